use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};

use crate::{
    cache::LruCache,
    compose,
    builtins::Functions,
    config::Config,
    error::{CompositionError, Error, NotFoundError, PlinthResult},
    interface::{Context, TemplateLoader},
    parser,
    template::Template,
    value::Function,
};

/// `Environment` compiles templates by name and keeps them for reuse.
///
/// Sources come from templates added with [`Environment::add_template`] and,
/// for names not found there, from an optional [`TemplateLoader`]. Compiled
/// templates are kept in a least-recently-used cache. An `Environment` is
/// cheap to clone and can be shared between threads.
///
/// # Examples
///
/// ```
/// use plinth::{Environment, context};
///
/// let env = Environment::new();
/// env.add_template("base", "<h1>{% block title %}Untitled{% endblock %}</h1>").unwrap();
/// env.add_template("page", "{% extends \"base\" %}{% block title %}{{ title }}{% endblock %}").unwrap();
///
/// let output = env.render("page", &context! { title => "Hello" }).unwrap();
/// assert_eq!(output, "<h1>Hello</h1>");
/// ```
#[derive(Clone)]
pub struct Environment {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    loader: Option<Box<dyn TemplateLoader>>,
    sources: RwLock<HashMap<String, Arc<str>>>,
    config: Config,
    functions: Arc<Functions>,
    cache: Mutex<LruCache<Arc<Template>>>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("has_loader", &self.shared.loader.is_some())
            .field("config", &self.shared.config)
            .field("functions", &self.shared.functions)
            .finish_non_exhaustive()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// An environment with the default configuration, the builtin functions
    /// and no loader.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn functions(&self) -> &Functions {
        &self.shared.functions
    }

    /// Adds a template source under `name`.
    ///
    /// The source is checked for syntax errors immediately, but inheritance
    /// and includes are only resolved when the template is compiled.
    ///
    /// # Arguments
    ///
    /// * `name` - The name to identify this template by
    /// * `source` - The template source
    ///
    /// # Errors
    ///
    /// * `Error::TemplateExists` if a template with the given name was already added
    /// * `Error::Syntax` if the source contains syntax errors
    pub fn add_template<N: AsRef<str>, S: Into<String>>(
        &self,
        name: N,
        source: S,
    ) -> PlinthResult<()> {
        let name = name.as_ref();
        let source = source.into();

        if self.shared.sources.read().contains_key(name) {
            return Err(Error::TemplateExists {
                name: name.to_owned(),
            });
        }
        parser::parse(name, &source, self.shared.config.trim_tag_lines)?;

        let mut sources = self.shared.sources.write();
        if sources.contains_key(name) {
            return Err(Error::TemplateExists {
                name: name.to_owned(),
            });
        }
        sources.insert(name.to_owned(), Arc::from(source));
        drop(sources);

        // A loader-provided version of this name, or a template extending
        // it, may already be cached.
        self.shared.cache.lock().clear();
        tracing::debug!(template = name, "added template");
        Ok(())
    }

    /// Returns the compiled template `name`, compiling it on first use.
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` if no source exists for `name`
    /// * `Error::Syntax` if the template or one of its ancestors is malformed
    /// * `Error::Composition` if an ancestor is missing or `extends` forms a cycle
    pub fn get_template(&self, name: &str) -> PlinthResult<Arc<Template>> {
        self.shared.get_template(name)
    }

    /// Compiles and renders the template `name` with `context`.
    ///
    /// # Errors
    ///
    /// Any error from [`Environment::get_template`], or `Error::Render` if
    /// rendering fails.
    pub fn render(&self, name: &str, context: &Context) -> PlinthResult<String> {
        Ok(self.get_template(name)?.render(context)?)
    }

    /// Compiles `name` without consulting or filling the cache.
    pub(crate) fn compile(&self, name: &str) -> PlinthResult<Template> {
        self.shared.compile(name)
    }
}

impl Shared {
    fn source(&self, name: &str) -> Result<Arc<str>, NotFoundError> {
        let stored = self.sources.read().get(name).cloned();
        if let Some(source) = stored {
            return Ok(source);
        }
        let loader = self.loader.as_ref().ok_or_else(|| NotFoundError::new(name))?;
        tracing::debug!(template = name, "loading template source");
        loader.load(name).map(Arc::from)
    }

    fn get_template(self: &Arc<Self>, name: &str) -> PlinthResult<Arc<Template>> {
        let cached = self.cache.lock().get(name);
        if let Some(template) = cached {
            return Ok(template);
        }

        // Compiled outside the lock; if another thread finishes first its
        // template is kept and returned.
        let template = Arc::new(self.compile(name)?);
        Ok(self.cache.lock().insert(name, template))
    }

    /// Resolves an `include` target.
    pub(crate) fn include(self: &Arc<Self>, name: &str) -> Result<Arc<Template>, CompositionError> {
        tracing::trace!(template = name, "resolving include");
        self.get_template(name).map_err(|err| match err {
            Error::NotFound(_) => CompositionError::MissingInclude {
                name: name.to_owned(),
            },
            other => CompositionError::InvalidInclude {
                name: name.to_owned(),
                source: Box::new(other),
            },
        })
    }

    /// Parses `name` and every ancestor it extends, then merges their blocks.
    fn compile(self: &Arc<Self>, name: &str) -> PlinthResult<Template> {
        tracing::debug!(template = name, "compiling template");

        let mut names: Vec<String> = Vec::new();
        let mut chain = Vec::new();
        let mut current = name.to_owned();
        loop {
            if names.contains(&current) {
                names.push(current);
                return Err(CompositionError::CircularExtends { chain: names }.into());
            }

            let source = match (self.source(&current), names.last()) {
                (Ok(source), _) => source,
                (Err(_), Some(child)) => {
                    return Err(CompositionError::MissingParent {
                        template: child.clone(),
                        parent: current,
                    }
                    .into());
                }
                (Err(err), None) => return Err(err.into()),
            };
            let nodes = parser::parse(&current, &source, self.config.trim_tag_lines)?;
            let parent = compose::extends_target(&nodes).map(str::to_owned);
            names.push(current);
            chain.push(nodes);

            match parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        let parent = names.get(1).cloned();
        let root_first: Vec<&[_]> = chain.iter().rev().map(Vec::as_slice).collect();
        let nodes = compose::merge(&root_first)?;
        tracing::debug!(template = name, ancestors = names.len().saturating_sub(1), "compiled template");

        Ok(Template::new(
            name.to_owned(),
            nodes,
            parent,
            self.config.clone(),
            Arc::clone(&self.functions),
            Arc::downgrade(self),
        ))
    }
}

/// Configures and builds an [`Environment`].
///
/// # Examples
///
/// ```
/// use plinth::{Environment, Function, MapLoader, Value, context};
///
/// let env = Environment::builder()
///     .loader(MapLoader::new().with_template("hello", "{{ shout(name) }}"))
///     .autoescape(true)
///     .function(Function::new("shout", |_, args| {
///         let [name] = args.exact::<1>("shout")?;
///         Ok(Value::from(format!("{}!", name).to_uppercase()))
///     }))
///     .build();
///
/// let output = env.render("hello", &context! { name => "<b>" }).unwrap();
/// assert_eq!(output, "&lt;B&gt;!");
/// ```
#[derive(Default)]
pub struct EnvironmentBuilder {
    loader: Option<Box<dyn TemplateLoader>>,
    config: Config,
    functions: Option<Functions>,
}

impl fmt::Debug for EnvironmentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentBuilder")
            .field("has_loader", &self.loader.is_some())
            .field("config", &self.config)
            .field("functions", &self.functions)
            .finish()
    }
}

impl EnvironmentBuilder {
    #[must_use]
    pub fn loader<L: TemplateLoader + 'static>(mut self, loader: L) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn autoescape(mut self, autoescape: bool) -> Self {
        self.config.autoescape = autoescape;
        self
    }

    #[must_use]
    pub const fn trim_tag_lines(mut self, trim_tag_lines: bool) -> Self {
        self.config.trim_tag_lines = trim_tag_lines;
        self
    }

    #[must_use]
    pub const fn max_include_depth(mut self, max_include_depth: usize) -> Self {
        self.config.max_include_depth = max_include_depth;
        self
    }

    #[must_use]
    pub const fn max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.config.max_call_depth = max_call_depth;
        self
    }

    #[must_use]
    pub const fn cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.config.cache_capacity = cache_capacity;
        self
    }

    /// Replaces the function table. Templates see only these functions.
    #[must_use]
    pub fn functions(mut self, functions: Functions) -> Self {
        self.functions = Some(functions);
        self
    }

    /// Adds `function` to the table, on top of the builtins unless
    /// [`EnvironmentBuilder::functions`] replaced them.
    #[must_use]
    pub fn function(mut self, function: Function) -> Self {
        self.functions
            .get_or_insert_with(Functions::builtins)
            .insert(function);
        self
    }

    pub fn build(self) -> Environment {
        let cache = LruCache::new(self.config.cache_capacity);
        Environment {
            shared: Arc::new(Shared {
                loader: self.loader,
                sources: RwLock::new(HashMap::new()),
                config: self.config,
                functions: Arc::new(self.functions.unwrap_or_else(Functions::builtins)),
                cache: Mutex::new(cache),
            }),
        }
    }
}
