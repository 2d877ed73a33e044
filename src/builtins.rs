//! The table of functions templates may call by name.
//!
//! Templates see exactly the functions in an environment's [`Functions`]
//! table. [`Functions::builtins`] is the default whitelist; embedders can add
//! to it or start from [`Functions::new`] and expose only their own.

use std::{cmp::Ordering, collections::HashMap, fmt, sync::Arc};

use crate::{
    error::{EvalError, EvalResult},
    eval::Evaluator,
    ops,
    value::{Args, Function, Map, Value},
};

/// Named functions visible to templates.
#[derive(Clone, Default)]
pub struct Functions {
    table: HashMap<String, Function>,
}

impl fmt::Debug for Functions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.table.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Functions").field("names", &names).finish()
    }
}

impl Functions {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default table: `abs`, `len`, `list`, `map`, `filter`, `range`,
    /// `str`, `int`, `float`, `bool`, `min`, `max`, `sum`, `sorted`,
    /// `reversed`, `enumerate`, `zip`, `dict`, `round` and `escape`.
    pub fn builtins() -> Self {
        let mut functions = Self::new();
        functions.insert(Function::new("abs", abs));
        functions.insert(Function::new("len", len));
        functions.insert(Function::new("list", list));
        functions.insert(Function::new("map", map));
        functions.insert(Function::new("filter", filter));
        functions.insert(Function::new("range", range));
        functions.insert(Function::new("str", to_str));
        functions.insert(Function::new("int", to_int));
        functions.insert(Function::new("float", to_float));
        functions.insert(Function::new("bool", to_bool));
        functions.insert(Function::new("min", |evaluator, args| {
            extreme(evaluator, args, "min", Ordering::Less)
        }));
        functions.insert(Function::new("max", |evaluator, args| {
            extreme(evaluator, args, "max", Ordering::Greater)
        }));
        functions.insert(Function::new("sum", sum));
        functions.insert(Function::new("sorted", sorted));
        functions.insert(Function::new("reversed", reversed));
        functions.insert(Function::new("enumerate", enumerate));
        functions.insert(Function::new("zip", zip));
        functions.insert(Function::new("dict", dict));
        functions.insert(Function::new("round", round));
        functions.insert(Function::new("escape", escape));
        functions
    }

    /// Adds `function` under its own name, replacing any previous entry.
    pub fn insert(&mut self, function: Function) -> &mut Self {
        self.table.insert(function.name().to_owned(), function);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Function> {
        self.table.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.table.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Writes `s` to `out` with `& < > " '` replaced by HTML entities.
pub(crate) fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
}

fn int_arg(func: &str, value: &Value) -> EvalResult<i64> {
    value.as_int().ok_or_else(|| {
        EvalError::type_error(format!(
            "{func}() expected an int, got '{}'",
            value.type_name()
        ))
    })
}

fn abs(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    match args.exact::<1>("abs")? {
        [Value::Int(i)] => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| EvalError::arithmetic("integer overflow")),
        [Value::Float(f)] => Ok(Value::Float(f.abs())),
        [other] => Err(EvalError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn len(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let [value] = args.exact::<1>("len")?;
    match &value {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::List(items) => Ok(Value::from(items.len())),
        Value::Map(map) => Ok(Value::from(map.len())),
        Value::Object(object) => object.iterate().map(|items| Value::from(items.len())).ok_or_else(|| {
            EvalError::type_error(format!("object of type '{}' has no len()", value.type_name()))
        }),
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Callable(_) => Err(
            EvalError::type_error(format!("object of type '{}' has no len()", value.type_name())),
        ),
    }
}

fn list(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let args = args.between("list", 0, 1)?;
    match args.first() {
        Some(value) => value.iterate().map(Value::from),
        None => Ok(Value::from(Vec::<Value>::new())),
    }
}

fn map(evaluator: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let [func, iterable] = args.exact::<2>("map")?;
    let mut mapped = Vec::new();
    for item in iterable.iterate()? {
        mapped.push(evaluator.call(&func, Args::from(vec![item]))?);
    }
    Ok(Value::from(mapped))
}

/// With `None` as the function, keeps the truthy items.
fn filter(evaluator: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let [func, iterable] = args.exact::<2>("filter")?;
    let mut kept = Vec::new();
    for item in iterable.iterate()? {
        let keep = match func {
            Value::None => item.is_true(),
            _ => evaluator.call(&func, Args::from(vec![item.clone()]))?.is_true(),
        };
        if keep {
            kept.push(item);
        }
    }
    Ok(Value::from(kept))
}

fn range(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let args = args.between("range", 1, 3)?;
    let ints = args
        .iter()
        .map(|value| int_arg("range", value))
        .collect::<EvalResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(EvalError::type_error("range() takes 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(EvalError::type_error("range() arg 3 must not be zero"));
    }

    let (wide_start, wide_stop, wide_step) =
        (i128::from(start), i128::from(stop), i128::from(step));
    let len = if wide_step > 0 {
        (wide_stop - wide_start + wide_step - 1).div_euclid(wide_step)
    } else {
        (wide_start - wide_stop - wide_step - 1).div_euclid(-wide_step)
    };
    let len = usize::try_from(len.max(0))
        .ok()
        .filter(|len| *len <= ops::MAX_SEQUENCE_LEN)
        .ok_or_else(|| EvalError::arithmetic("range() result is too long"))?;

    let mut items = Vec::with_capacity(len);
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::from(items))
}

fn to_str(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let args = args.between("str", 0, 1)?;
    Ok(args
        .first()
        .map_or_else(|| Value::from(""), |value| Value::from(value.to_string())))
}

fn to_int(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let args = args.between("int", 0, 1)?;
    let Some(value) = args.first() else {
        return Ok(Value::Int(0));
    };
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => {
            let truncated = f.trunc();
            if truncated.is_finite() && truncated.abs() < 9.2e18 {
                Ok(Value::Int(truncated as i64))
            } else {
                Err(EvalError::arithmetic(format!(
                    "cannot convert float {} to integer",
                    value
                )))
            }
        }
        Value::String(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            EvalError::type_error(format!(
                "invalid literal for int() with base 10: {}",
                value.repr()
            ))
        }),
        other => Err(EvalError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let args = args.between("float", 0, 1)?;
    let Some(value) = args.first() else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Bool(b) => Ok(Value::Float(f64::from(u8::from(*b)))),
        Value::String(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            EvalError::type_error(format!(
                "could not convert string to float: {}",
                value.repr()
            ))
        }),
        other => Err(EvalError::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_bool(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let args = args.between("bool", 0, 1)?;
    Ok(Value::Bool(args.first().is_some_and(Value::is_true)))
}

/// Pairs each item with its sort key, computed by `key` when one is given.
fn keyed(
    evaluator: &Evaluator<'_>,
    items: Vec<Value>,
    key: Option<&Value>,
) -> EvalResult<Vec<(Value, Value)>> {
    items
        .into_iter()
        .map(|item| {
            let sort_key = match key.filter(|key| !matches!(key, Value::None)) {
                Some(key) => evaluator.call(key, Args::from(vec![item.clone()]))?,
                None => item.clone(),
            };
            Ok((sort_key, item))
        })
        .collect()
}

/// `min`/`max` over one iterable argument or over several arguments.
fn extreme(
    evaluator: &Evaluator<'_>,
    mut args: Args,
    func: &str,
    wanted: Ordering,
) -> EvalResult<Value> {
    let key = args.take_kwarg("key");
    let default = args.take_kwarg("default");
    let args = args.between(func, 1, usize::MAX)?;
    let items = match <[Value; 1]>::try_from(args) {
        Ok([iterable]) => iterable.iterate()?,
        Err(args) => args,
    };

    let mut best: Option<(Value, Value)> = None;
    for (sort_key, item) in keyed(evaluator, items, key.as_ref())? {
        let replace = match &best {
            None => true,
            Some((best_key, _)) => ops::compare(&sort_key, best_key)? == wanted,
        };
        if replace {
            best = Some((sort_key, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(EvalError::lookup(format!("{func}() arg is an empty sequence"))),
    }
}

fn sum(_: &Evaluator<'_>, mut args: Args) -> EvalResult<Value> {
    let start = args.take_kwarg("start");
    let mut args = args.between("sum", 1, 2)?.into_iter();
    let iterable = args.next().unwrap_or_default();
    let mut total = args.next().or(start).unwrap_or(Value::Int(0));
    for item in iterable.iterate()? {
        total = ops::binary(crate::ast::BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn sorted(evaluator: &Evaluator<'_>, mut args: Args) -> EvalResult<Value> {
    let key = args.take_kwarg("key");
    let reverse = args.take_kwarg("reverse").is_some_and(|value| value.is_true());
    let [iterable] = args.exact::<1>("sorted")?;

    let mut pairs = keyed(evaluator, iterable.iterate()?, key.as_ref())?;
    let mut failure = None;
    pairs.sort_by(|(a, _), (b, _)| match ops::compare(a, b) {
        Ok(ordering) => ordering,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }

    let mut items: Vec<Value> = pairs.into_iter().map(|(_, item)| item).collect();
    if reverse {
        items.reverse();
    }
    Ok(Value::from(items))
}

fn reversed(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let [iterable] = args.exact::<1>("reversed")?;
    let mut items = iterable.iterate()?;
    items.reverse();
    Ok(Value::from(items))
}

fn enumerate(_: &Evaluator<'_>, mut args: Args) -> EvalResult<Value> {
    let start = args.take_kwarg("start");
    let mut args = args.between("enumerate", 1, 2)?.into_iter();
    let iterable = args.next().unwrap_or_default();
    let start = match args.next().or(start) {
        Some(value) => int_arg("enumerate", &value)?,
        None => 0,
    };

    let mut pairs = Vec::new();
    let mut index = start;
    for item in iterable.iterate()? {
        pairs.push(Value::List(Arc::new(vec![Value::Int(index), item])));
        index = index.saturating_add(1);
    }
    Ok(Value::from(pairs))
}

fn zip(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let iterables = args
        .between("zip", 0, usize::MAX)?
        .iter()
        .map(Value::iterate)
        .collect::<EvalResult<Vec<_>>>()?;
    let shortest = iterables.iter().map(Vec::len).min().unwrap_or(0);
    let rows = (0..shortest)
        .map(|i| {
            Value::List(Arc::new(
                iterables
                    .iter()
                    .filter_map(|items| items.get(i).cloned())
                    .collect(),
            ))
        })
        .collect::<Vec<_>>();
    Ok(Value::from(rows))
}

/// `dict(mapping_or_pairs, **kwargs)`.
fn dict(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let keyword = args.keyword().to_vec();
    let positional = Args::from(args.positional().to_vec()).between("dict", 0, 1)?;

    let mut map = Map::new();
    if let Some(source) = positional.first() {
        match source {
            Value::Map(source) => map.extend(source.iter().map(|(k, v)| (k.clone(), v.clone()))),
            other => {
                for (i, pair) in other.iterate()?.into_iter().enumerate() {
                    match pair.as_list() {
                        Some([key, value]) => {
                            map.insert(key.to_key(), value.clone());
                        }
                        _ => {
                            return Err(EvalError::type_error(format!(
                                "dictionary update sequence element #{i} has the wrong shape"
                            )));
                        }
                    }
                }
            }
        }
    }
    map.extend(keyword);
    Ok(Value::Map(Arc::new(map)))
}

/// Rounds half to even, like the source language does.
fn round(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let args = args.between("round", 1, 2)?;
    let digits = match args.get(1) {
        None | Some(Value::None) => None,
        Some(value) => Some(int_arg("round", value)?),
    };
    match (args.first(), digits) {
        (Some(Value::Int(i)), _) => Ok(Value::Int(*i)),
        (Some(Value::Float(f)), None) => {
            let rounded = f.round_ties_even();
            if rounded.is_finite() && rounded.abs() < 9.2e18 {
                Ok(Value::Int(rounded as i64))
            } else {
                Err(EvalError::arithmetic("cannot round a non-finite float to an integer"))
            }
        }
        (Some(Value::Float(f)), Some(digits)) => {
            let scale = 10f64.powi(i32::try_from(digits.clamp(-308, 308)).unwrap_or(0));
            Ok(Value::Float((f * scale).round_ties_even() / scale))
        }
        (Some(other), _) => Err(EvalError::type_error(format!(
            "type '{}' doesn't define __round__",
            other.type_name()
        ))),
        (None, _) => Err(EvalError::type_error("round() takes 1 or 2 arguments")),
    }
}

fn escape(_: &Evaluator<'_>, args: Args) -> EvalResult<Value> {
    let [value] = args.exact::<1>("escape")?;
    let text = value.to_string();
    let mut escaped = String::with_capacity(text.len());
    escape_into(&text, &mut escaped);
    Ok(Value::from(escaped))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrorKind;

    fn call(name: &str, args: Vec<Value>) -> EvalResult<Value> {
        call_with(name, Args::from(args))
    }

    fn call_with(name: &str, args: Args) -> EvalResult<Value> {
        let functions = Functions::builtins();
        let evaluator = Evaluator::new(&functions, 64);
        let func = functions.get(name).unwrap().clone();
        evaluator.call(&Value::from(func), args)
    }

    fn kwarg(name: &str, value: impl Into<Value>) -> (String, Value) {
        (name.to_owned(), value.into())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_abs_and_len() {
        assert_eq!(call("abs", vec![Value::Int(-3)]).unwrap(), Value::Int(3));
        assert_eq!(
            call("abs", vec![Value::Float(-1.5)]).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            call("len", vec![Value::from(vec![1, 2, 3])]).unwrap(),
            Value::Int(3)
        );
        assert_eq!(call("len", vec![Value::from("héllo")]).unwrap(), Value::Int(5));
        let err = call("len", vec![Value::Int(3)]).unwrap_err();
        assert_eq!(err.to_string(), "object of type 'int' has no len()");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_range() {
        assert_eq!(
            call("range", vec![Value::Int(3)]).unwrap(),
            Value::from(vec![0, 1, 2])
        );
        assert_eq!(
            call("range", vec![Value::Int(5), Value::Int(0), Value::Int(-2)]).unwrap(),
            Value::from(vec![5, 3, 1])
        );
        assert!(call("range", vec![Value::Int(1), Value::Int(2), Value::Int(0)]).is_err());
        assert_eq!(
            call("range", vec![Value::Int(0), Value::Int(10), Value::Int(3)]).unwrap(),
            Value::from(vec![0, 3, 6, 9])
        );
        assert_eq!(
            call("range", vec![Value::Int(3), Value::Int(1)]).unwrap(),
            Value::from(Vec::<Value>::new())
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_range_length_is_bounded() {
        for args in [
            vec![Value::Int(1_000_000_000_000)],
            vec![Value::Int(i64::MIN), Value::Int(i64::MAX)],
            vec![Value::Int(i64::MAX), Value::Int(i64::MIN), Value::Int(-1)],
        ] {
            let err = call("range", args).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Arithmetic);
            assert_eq!(err.to_string(), "range() result is too long");
        }

        let Value::List(items) = call(
            "range",
            vec![Value::Int(i64::MIN), Value::Int(i64::MAX), Value::Int(i64::MAX)],
        )
        .unwrap() else {
            panic!("expected a list");
        };
        assert_eq!(items.len(), 3);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_conversions() {
        assert_eq!(call("str", vec![Value::Float(2.0)]).unwrap(), Value::from("2.0"));
        assert_eq!(call("int", vec![Value::from(" 42 ")]).unwrap(), Value::Int(42));
        assert_eq!(call("int", vec![Value::Float(-2.7)]).unwrap(), Value::Int(-2));
        assert_eq!(
            call("float", vec![Value::from("1.5")]).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(call("bool", vec![Value::from("")]).unwrap(), Value::Bool(false));
        let err = call("int", vec![Value::from("x")]).unwrap_err();
        assert_eq!(err.to_string(), "invalid literal for int() with base 10: 'x'");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_min_max_sum() {
        let list = Value::from(vec![3, 1, 2]);
        assert_eq!(call("min", vec![list.clone()]).unwrap(), Value::Int(1));
        assert_eq!(
            call("max", vec![Value::Int(1), Value::Int(5), Value::Int(2)]).unwrap(),
            Value::Int(5)
        );
        assert_eq!(call("sum", vec![list]).unwrap(), Value::Int(6));
        assert_eq!(
            call_with(
                "sum",
                Args::new(vec![Value::from(vec![0.5])], vec![kwarg("start", 1)])
            )
            .unwrap(),
            Value::Float(1.5)
        );
        let err = call("max", vec![Value::from(Vec::<Value>::new())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_sorted() {
        assert_eq!(
            call_with(
                "sorted",
                Args::new(vec![Value::from(vec![2, 3, 1])], vec![kwarg("reverse", true)])
            )
            .unwrap(),
            Value::from(vec![3, 2, 1])
        );
        let len = Value::from(Functions::builtins().get("len").unwrap().clone());
        assert_eq!(
            call_with(
                "sorted",
                Args::new(
                    vec![Value::from(vec!["ccc", "a", "bb"])],
                    vec![kwarg("key", len)]
                )
            )
            .unwrap(),
            Value::from(vec!["a", "bb", "ccc"])
        );
        let err = call("sorted", vec![Value::from(vec![Value::Int(1), Value::from("a")])]);
        assert_eq!(err.unwrap_err().kind(), ErrorKind::Type);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_sequence_helpers() {
        assert_eq!(
            call("reversed", vec![Value::from(vec![1, 2])]).unwrap(),
            Value::from(vec![2, 1])
        );
        assert_eq!(
            call("enumerate", vec![Value::from(vec!["a", "b"])])
                .unwrap()
                .to_string(),
            "[[0, 'a'], [1, 'b']]"
        );
        assert_eq!(
            call(
                "zip",
                vec![Value::from(vec![1, 2, 3]), Value::from(vec!["a", "b"])]
            )
            .unwrap()
            .to_string(),
            "[[1, 'a'], [2, 'b']]"
        );
        assert_eq!(
            call("list", vec![Value::from("ab")]).unwrap(),
            Value::from(vec!["a", "b"])
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_dict() {
        let pairs = Value::from(vec![Value::from(vec![Value::from("a"), Value::Int(1)])]);
        let result = call_with("dict", Args::new(vec![pairs], vec![kwarg("b", 2)])).unwrap();
        assert_eq!(result.to_string(), "{'a': 1, 'b': 2}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_round_half_even() {
        assert_eq!(call("round", vec![Value::Float(2.5)]).unwrap(), Value::Int(2));
        assert_eq!(call("round", vec![Value::Float(3.5)]).unwrap(), Value::Int(4));
        assert_eq!(
            call("round", vec![Value::Float(1.234), Value::Int(2)]).unwrap(),
            Value::Float(1.23)
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escape() {
        assert_eq!(
            call("escape", vec![Value::from("<a href=\"x\">&'")]).unwrap(),
            Value::from("&lt;a href=&quot;x&quot;&gt;&amp;&#039;")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_custom_table() {
        let mut functions = Functions::new();
        assert!(functions.is_empty());
        functions.insert(Function::new("double", |_, args| {
            let [value] = args.exact::<1>("double")?;
            ops::binary(crate::ast::BinOp::Mul, &value, &Value::Int(2))
        }));
        assert!(functions.contains("double"));
        assert!(!functions.contains("len"));
        assert_eq!(functions.len(), 1);
    }
}
