use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use crate::{
    ast::Expr,
    error::{EvalError, EvalResult},
    eval::Evaluator,
    scope::Scope,
};

/// The mapping type used for dict values. Keys iterate in sorted order.
pub type Map = BTreeMap<String, Value>;

/// Signature of a native function callable from templates.
pub type NativeFn = dyn Fn(&Evaluator<'_>, Args) -> EvalResult<Value> + Send + Sync;

/// A dynamically typed template value.
///
/// Sequences and mappings are reference counted, so cloning a value out of a
/// scope never copies its contents.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    List(Arc<Vec<Value>>),
    Map(Arc<Map>),
    Callable(Callable),
    Object(Arc<dyn Object>),
}

/// An externally supplied value exposing a fixed set of attributes.
///
/// Only what `get_attr` returns is visible to templates; everything else about
/// the implementing type stays private to the embedding application.
pub trait Object: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str {
        "object"
    }

    /// Returns the exposed attribute `name`, or `None` if it is not exposed.
    fn get_attr(&self, name: &str) -> Option<Value>;

    /// Items produced when the object is iterated, if it is iterable.
    fn iterate(&self) -> Option<Vec<Value>> {
        None
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object>", self.type_name())
    }
}

/// A named record whose fields are all exposed to templates.
///
/// ```
/// use plinth::{Record, Value};
///
/// let point = Record::new("Point").with_field("x", 1).with_field("y", 2);
/// let value = Value::from_object(point);
/// assert_eq!(value.to_string(), "<Point object>");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Record {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new<N: Into<String>>(type_name: N) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_field<N: Into<String>, V: Into<Value>>(mut self, name: N, value: V) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

impl Object for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }
}

#[derive(Clone)]
pub enum Callable {
    Function(Function),
    Lambda(Arc<Lambda>),
}

/// A named native function.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    func: Arc<NativeFn>,
}

impl Function {
    pub fn new<N, F>(name: N, func: F) -> Self
    where
        N: AsRef<str>,
        F: Fn(&Evaluator<'_>, Args) -> EvalResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, evaluator: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
        (self.func)(evaluator, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// An anonymous function closing over the scope it was created in.
pub struct Lambda {
    pub(crate) params: Vec<String>,
    pub(crate) body: Arc<Expr>,
    pub(crate) scope: Arc<Scope>,
}

/// Arguments of a call: positional values followed by keyword values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl Args {
    pub const fn new(positional: Vec<Value>, keyword: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &[(String, Value)] {
        &self.keyword
    }

    pub(crate) fn into_parts(self) -> (Vec<Value>, Vec<(String, Value)>) {
        (self.positional, self.keyword)
    }

    /// Removes and returns the keyword argument `name`, if it was passed.
    pub fn take_kwarg(&mut self, name: &str) -> Option<Value> {
        let index = self.keyword.iter().position(|(key, _)| key == name)?;
        Some(self.keyword.remove(index).1)
    }

    /// Checks that between `min` and `max` positional arguments and no
    /// remaining keyword arguments were passed to `func`.
    pub fn between(self, func: &str, min: usize, max: usize) -> EvalResult<Vec<Value>> {
        if let Some((key, _)) = self.keyword.first() {
            return Err(EvalError::type_error(format!(
                "{func}() got an unexpected keyword argument '{key}'"
            )));
        }
        let count = self.positional.len();
        if count < min || count > max {
            let expected = if min == max {
                format!("exactly {min}")
            } else if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("between {min} and {max}")
            };
            return Err(EvalError::type_error(format!(
                "{func}() takes {expected} argument(s) ({count} given)"
            )));
        }
        Ok(self.positional)
    }

    /// Like [`Args::between`] for a fixed count, returned as an array.
    pub fn exact<const N: usize>(self, func: &str) -> EvalResult<[Value; N]> {
        let values = self.between(func, N, N)?;
        <[Value; N]>::try_from(values).map_err(|values| {
            EvalError::type_error(format!(
                "{func}() takes exactly {N} argument(s) ({} given)",
                values.len()
            ))
        })
    }
}

impl From<Vec<Value>> for Args {
    fn from(positional: Vec<Value>) -> Self {
        Self::new(positional, Vec::new())
    }
}

impl Value {
    pub fn from_object<O: Object + 'static>(object: O) -> Self {
        Self::Object(Arc::new(object))
    }

    pub fn from_function<N, F>(name: N, func: F) -> Self
    where
        N: AsRef<str>,
        F: Fn(&Evaluator<'_>, Args) -> EvalResult<Value> + Send + Sync + 'static,
    {
        Self::Callable(Callable::Function(Function::new(name, func)))
    }

    /// The type name used in error messages.
    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "dict",
            Self::Callable(_) => "function",
            Self::Object(object) => object.type_name(),
        }
    }

    /// Truthiness: `None`, `False`, zero and empty containers are false.
    pub fn is_true(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
            Self::Callable(_) | Self::Object(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The items produced by iterating this value: list items, the characters
    /// of a string, the keys of a dict, or an iterable object's items.
    pub fn iterate(&self) -> EvalResult<Vec<Value>> {
        match self {
            Self::List(items) => Ok(items.as_ref().clone()),
            Self::String(s) => Ok(s.chars().map(|c| Self::from(c.to_string())).collect()),
            Self::Map(map) => Ok(map.keys().map(|key| Self::from(key.as_str())).collect()),
            Self::Object(object) => object.iterate().ok_or_else(|| self.not_iterable()),
            Self::None | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Callable(_) => {
                Err(self.not_iterable())
            }
        }
    }

    fn not_iterable(&self) -> EvalError {
        EvalError::type_error(format!("'{}' object is not iterable", self.type_name()))
    }

    /// The key a value stands for when used to build or index a dict.
    pub(crate) fn to_key(&self) -> String {
        match self {
            Self::String(s) => s.to_string(),
            other => other.to_string(),
        }
    }

    /// Python-style `repr`: strings are quoted, everything else prints as `str`.
    pub fn repr(&self) -> String {
        match self {
            Self::String(s) => quote(s),
            other => other.to_string(),
        }
    }
}

fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

pub(crate) fn format_float(value: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if value.is_nan() {
        f.write_str("nan")
    } else if value.is_infinite() {
        f.write_str(if value > 0.0 { "inf" } else { "-inf" })
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        write!(f, "{value:.1}")
    } else {
        write!(f, "{value}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(value) => format_float(*value, f),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&item.repr())?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", quote(key), value.repr())?;
                }
                f.write_str("}")
            }
            Self::Callable(Callable::Function(func)) => write!(f, "<function {}>", func.name()),
            Self::Callable(Callable::Lambda(_)) => f.write_str("<function <lambda>>"),
            Self::Object(object) => object.render(f),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(object) => fmt::Debug::fmt(object, f),
            other => f.write_str(&other.repr()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Callable(Callable::Function(a)), Self::Callable(Callable::Function(b))) => {
                Arc::ptr_eq(&a.func, &b.func)
            }
            (Self::Callable(Callable::Lambda(a)), Self::Callable(Callable::Lambda(b))) => {
                Arc::ptr_eq(a, b)
            }
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        i64::try_from(value).map_or(Self::Float(value as f64), Self::Int)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Self::Callable(Callable::Function(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::List(Arc::new(values.into_iter().map(Into::into).collect()))
    }
}

impl<K: Into<String>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(map: BTreeMap<K, V>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> From<HashMap<K, V>> for Value {
    fn from(map: HashMap<K, V>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Map(Arc::new(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        ))
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use std::sync::Arc;

    use serde::{
        Deserialize, Deserializer, Serialize, Serializer,
        de::{MapAccess, SeqAccess, Visitor},
        ser::{SerializeMap, SerializeSeq},
    };

    use super::{Map, Value};

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Self::None => serializer.serialize_unit(),
                Self::Bool(b) => serializer.serialize_bool(*b),
                Self::Int(i) => serializer.serialize_i64(*i),
                Self::Float(f) => serializer.serialize_f64(*f),
                Self::String(s) => serializer.serialize_str(s),
                Self::List(items) => {
                    let mut seq = serializer.serialize_seq(Some(items.len()))?;
                    for item in items.iter() {
                        seq.serialize_element(item)?;
                    }
                    seq.end()
                }
                Self::Map(map) => {
                    let mut out = serializer.serialize_map(Some(map.len()))?;
                    for (key, value) in map.iter() {
                        out.serialize_entry(key, value)?;
                    }
                    out.end()
                }
                Self::Callable(_) | Self::Object(_) => serializer.serialize_str(&self.to_string()),
            }
        }
    }

    struct ValueVisitor;

    impl<'de> Visitor<'de> for ValueVisitor {
        type Value = Value;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a template value")
        }

        fn visit_unit<E>(self) -> Result<Value, E> {
            Ok(Value::None)
        }

        fn visit_none<E>(self) -> Result<Value, E> {
            Ok(Value::None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
            Value::deserialize(deserializer)
        }

        fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
            Ok(Value::Bool(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
            Ok(Value::Int(v))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
            Ok(i64::try_from(v).map_or(Value::Float(v as f64), Value::Int))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
            Ok(Value::Float(v))
        }

        fn visit_str<E>(self, v: &str) -> Result<Value, E> {
            Ok(Value::from(v))
        }

        fn visit_string<E>(self, v: String) -> Result<Value, E> {
            Ok(Value::from(v))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
            let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(item) = seq.next_element()? {
                items.push(item);
            }
            Ok(Value::List(Arc::new(items)))
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
            let mut map = Map::new();
            while let Some((key, value)) = access.next_entry::<String, Value>()? {
                map.insert(key, value);
            }
            Ok(Value::Map(Arc::new(map)))
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(ValueVisitor)
        }
    }
}
