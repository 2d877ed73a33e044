use std::collections::{BTreeMap, HashMap};

use crate::{error::NotFoundError, value::Value};

/// The variables a template is rendered with.
///
/// # Examples
///
/// ```
/// use plinth::{Context, Value};
///
/// let mut context = Context::new();
/// context.insert("name", "flango").insert("items", vec![1, 2, 3]);
///
/// assert_eq!(context.get("name"), Some(&Value::from("flango")));
/// assert!(context.contains("items"));
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    data: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N: AsRef<str>, V: Into<Value>>(&mut self, name: N, value: V) -> &mut Self {
        self.data.insert(name.as_ref().to_owned(), value.into());
        self
    }

    pub fn get<N: AsRef<str>>(&self, name: N) -> Option<&Value> {
        self.data.get(name.as_ref())
    }

    pub fn contains<N: AsRef<str>>(&self, name: N) -> bool {
        self.data.contains_key(name.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.data.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The root scope frame of a render call.
    pub(crate) fn to_vars(&self) -> HashMap<String, Value> {
        self.data
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            data: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Builds a [`Context`] from `name => value` pairs.
///
/// ```
/// use plinth::context;
///
/// let context = context! { name => "flango", count => 3 };
/// assert_eq!(context.len(), 2);
/// ```
#[macro_export]
macro_rules! context {
    () => {
        $crate::Context::new()
    };
    ($($name:ident => $value:expr),+ $(,)?) => {{
        let mut context = $crate::Context::new();
        $(
            context.insert(stringify!($name), $value);
        )+
        context
    }};
}

/// Supplies template sources by name.
///
/// Implemented for any `Fn(&str) -> Option<String>` closure, and by
/// [`MapLoader`] for a fixed set of sources. Loading may block; the
/// environment calls it without holding any of its locks.
pub trait TemplateLoader: Send + Sync {
    /// Returns the source of `name`.
    ///
    /// # Errors
    /// - If no template called `name` exists.
    fn load(&self, name: &str) -> Result<String, NotFoundError>;
}

impl<F> TemplateLoader for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn load(&self, name: &str) -> Result<String, NotFoundError> {
        self(name).ok_or_else(|| NotFoundError::new(name))
    }
}

/// A loader over an in-memory map of sources.
#[derive(Debug, Clone, Default)]
pub struct MapLoader {
    sources: HashMap<String, String>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_template<N: Into<String>, S: Into<String>>(mut self, name: N, source: S) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert<N: Into<String>, S: Into<String>>(&mut self, name: N, source: S) -> &mut Self {
        self.sources.insert(name.into(), source.into());
        self
    }
}

impl TemplateLoader for MapLoader {
    fn load(&self, name: &str) -> Result<String, NotFoundError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| NotFoundError::new(name))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_context_macro() {
        let context = context! { name => "flango", items => vec![1, 2] };
        assert_eq!(context.get("name"), Some(&Value::from("flango")));
        assert_eq!(context.get("items"), Some(&Value::from(vec![1, 2])));
        assert_eq!(
            context.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            vec!["items", "name"]
        );
        assert!(context! {}.is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_loaders() {
        let loader = MapLoader::new().with_template("base", "B");
        assert_eq!(loader.load("base"), Ok("B".to_owned()));
        assert_eq!(loader.load("nope"), Err(NotFoundError::new("nope")));

        let closure = |name: &str| (name == "x").then(|| "X".to_owned());
        assert_eq!(closure.load("x"), Ok("X".to_owned()));
        assert_eq!(closure.load("y"), Err(NotFoundError::new("y")));
    }
}
