//! The methods each builtin value kind exposes to templates.
//!
//! Nothing outside these tables is reachable through `value.name`.

use std::sync::Arc;

use crate::{
    error::{EvalError, EvalResult},
    value::{Args, Value},
};

pub(crate) type Method = fn(&Value, Args) -> EvalResult<Value>;

/// Finds the method `name` on the kind of `receiver`.
pub(crate) fn lookup(receiver: &Value, name: &str) -> Option<Method> {
    let method: Method = match (receiver, name) {
        (Value::List(_), "index") => list_index,
        (Value::List(_), "count") => list_count,
        (Value::String(_), "upper") => str_upper,
        (Value::String(_), "lower") => str_lower,
        (Value::String(_), "strip") => str_strip,
        (Value::String(_), "lstrip") => str_lstrip,
        (Value::String(_), "rstrip") => str_rstrip,
        (Value::String(_), "split") => str_split,
        (Value::String(_), "join") => str_join,
        (Value::String(_), "startswith") => str_startswith,
        (Value::String(_), "endswith") => str_endswith,
        (Value::String(_), "replace") => str_replace,
        (Value::String(_), "title") => str_title,
        (Value::String(_), "capitalize") => str_capitalize,
        (Value::String(_), "find") => str_find,
        (Value::String(_), "count") => str_count,
        (Value::Map(_), "keys") => dict_keys,
        (Value::Map(_), "values") => dict_values,
        (Value::Map(_), "items") => dict_items,
        (Value::Map(_), "get") => dict_get,
        _ => return None,
    };
    Some(method)
}

fn list(receiver: &Value) -> &[Value] {
    receiver.as_list().unwrap_or_default()
}

fn string(receiver: &Value) -> &str {
    receiver.as_str().unwrap_or_default()
}

fn string_arg<'v>(func: &str, value: &'v Value) -> EvalResult<&'v str> {
    value.as_str().ok_or_else(|| {
        EvalError::type_error(format!(
            "{func}() argument must be str, not '{}'",
            value.type_name()
        ))
    })
}

fn list_index(receiver: &Value, args: Args) -> EvalResult<Value> {
    let [needle] = args.exact::<1>("index")?;
    list(receiver)
        .iter()
        .position(|item| *item == needle)
        .map(Value::from)
        .ok_or_else(|| EvalError::lookup(format!("{} is not in list", needle.repr())))
}

fn list_count(receiver: &Value, args: Args) -> EvalResult<Value> {
    let [needle] = args.exact::<1>("count")?;
    let count = list(receiver).iter().filter(|item| **item == needle).count();
    Ok(Value::from(count))
}

fn str_upper(receiver: &Value, args: Args) -> EvalResult<Value> {
    args.exact::<0>("upper")?;
    Ok(Value::from(string(receiver).to_uppercase()))
}

fn str_lower(receiver: &Value, args: Args) -> EvalResult<Value> {
    args.exact::<0>("lower")?;
    Ok(Value::from(string(receiver).to_lowercase()))
}

/// Shared body of `strip`, `lstrip` and `rstrip`. Without an argument
/// whitespace is removed, otherwise any of the given characters.
fn strip_with(
    receiver: &Value,
    args: Args,
    func: &str,
    trim: fn(&str, &dyn Fn(char) -> bool) -> String,
) -> EvalResult<Value> {
    let args = args.between(func, 0, 1)?;
    let s = string(receiver);
    let stripped = match args.first() {
        None | Some(Value::None) => trim(s, &char::is_whitespace),
        Some(chars) => {
            let chars = string_arg(func, chars)?;
            trim(s, &|c: char| chars.contains(c))
        }
    };
    Ok(Value::from(stripped))
}

fn str_strip(receiver: &Value, args: Args) -> EvalResult<Value> {
    strip_with(receiver, args, "strip", |s, p| s.trim_matches(p).to_owned())
}

fn str_lstrip(receiver: &Value, args: Args) -> EvalResult<Value> {
    strip_with(receiver, args, "lstrip", |s, p| s.trim_start_matches(p).to_owned())
}

fn str_rstrip(receiver: &Value, args: Args) -> EvalResult<Value> {
    strip_with(receiver, args, "rstrip", |s, p| s.trim_end_matches(p).to_owned())
}

fn str_split(receiver: &Value, mut args: Args) -> EvalResult<Value> {
    let maxsplit_kwarg = args.take_kwarg("maxsplit");
    let sep_kwarg = args.take_kwarg("sep");
    let mut args = args.between("split", 0, 2)?.into_iter();
    let sep = args.next().or(sep_kwarg).unwrap_or_default();
    let maxsplit = match args.next().or(maxsplit_kwarg) {
        None => None,
        Some(Value::Int(n)) => usize::try_from(n).ok(),
        Some(other) => {
            return Err(EvalError::type_error(format!(
                "split() maxsplit must be int, not '{}'",
                other.type_name()
            )));
        }
    };

    let s = string(receiver);
    let parts: Vec<Value> = match sep {
        Value::None => match maxsplit {
            None => s.split_whitespace().map(Value::from).collect(),
            Some(max) => split_whitespace_n(s, max),
        },
        Value::String(sep) if sep.is_empty() => {
            return Err(EvalError::type_error("split() empty separator"));
        }
        Value::String(sep) => match maxsplit {
            None => s.split(&*sep).map(Value::from).collect(),
            Some(max) => s.splitn(max.saturating_add(1), &*sep).map(Value::from).collect(),
        },
        other => return Err(EvalError::type_error(format!(
            "split() argument must be str or None, not '{}'",
            other.type_name()
        ))),
    };
    Ok(Value::from(parts))
}

/// Whitespace split with at most `max` splits; the remainder keeps its
/// inner whitespace.
fn split_whitespace_n(s: &str, max: usize) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() == max {
            parts.push(Value::from(rest.trim_end()));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (part, tail) = rest.split_at(end);
        parts.push(Value::from(part));
        rest = tail.trim_start();
    }
    parts
}

fn str_join(receiver: &Value, args: Args) -> EvalResult<Value> {
    let [items] = args.exact::<1>("join")?;
    let items = items.iterate()?;
    let mut pieces = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let piece = item.as_str().ok_or_else(|| {
            EvalError::type_error(format!(
                "sequence item {i}: expected str instance, {} found",
                item.type_name()
            ))
        })?;
        pieces.push(piece);
    }
    Ok(Value::from(pieces.join(string(receiver))))
}

/// `prefix` may be a string or a list of strings.
fn affix_matches(func: &str, affix: &Value, matches: impl Fn(&str) -> bool) -> EvalResult<bool> {
    match affix {
        Value::List(candidates) => {
            for candidate in candidates.iter() {
                if matches(string_arg(func, candidate)?) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Ok(matches(string_arg(func, other)?)),
    }
}

fn str_startswith(receiver: &Value, args: Args) -> EvalResult<Value> {
    let [prefix] = args.exact::<1>("startswith")?;
    let s = string(receiver);
    affix_matches("startswith", &prefix, |p| s.starts_with(p)).map(Value::Bool)
}

fn str_endswith(receiver: &Value, args: Args) -> EvalResult<Value> {
    let [suffix] = args.exact::<1>("endswith")?;
    let s = string(receiver);
    affix_matches("endswith", &suffix, |p| s.ends_with(p)).map(Value::Bool)
}

fn str_replace(receiver: &Value, args: Args) -> EvalResult<Value> {
    let args = args.between("replace", 2, 3)?;
    let (old, new) = match args.as_slice() {
        [old, new, ..] => (string_arg("replace", old)?, string_arg("replace", new)?),
        _ => return Err(EvalError::type_error("replace() takes 2 or 3 arguments")),
    };
    let s = string(receiver);
    let replaced = match args.get(2) {
        None => s.replace(old, new),
        Some(Value::Int(count)) => s.replacen(old, new, usize::try_from(*count).unwrap_or(usize::MAX)),
        Some(other) => {
            return Err(EvalError::type_error(format!(
                "replace() count must be int, not '{}'",
                other.type_name()
            )));
        }
    };
    Ok(Value::from(replaced))
}

fn str_title(receiver: &Value, args: Args) -> EvalResult<Value> {
    args.exact::<0>("title")?;
    let mut titled = String::with_capacity(string(receiver).len());
    let mut previous_is_letter = false;
    for c in string(receiver).chars() {
        if previous_is_letter {
            titled.extend(c.to_lowercase());
        } else {
            titled.extend(c.to_uppercase());
        }
        previous_is_letter = c.is_alphabetic();
    }
    Ok(Value::from(titled))
}

fn str_capitalize(receiver: &Value, args: Args) -> EvalResult<Value> {
    args.exact::<0>("capitalize")?;
    let mut chars = string(receiver).chars();
    let capitalized = match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    };
    Ok(Value::from(capitalized))
}

fn str_find(receiver: &Value, args: Args) -> EvalResult<Value> {
    let [needle] = args.exact::<1>("find")?;
    let s = string(receiver);
    let index = s
        .find(string_arg("find", &needle)?)
        .map_or(-1, |byte| {
            let chars = s.get(..byte).unwrap_or_default().chars().count();
            i64::try_from(chars).unwrap_or(i64::MAX)
        });
    Ok(Value::Int(index))
}

fn str_count(receiver: &Value, args: Args) -> EvalResult<Value> {
    let [needle] = args.exact::<1>("count")?;
    let needle = string_arg("count", &needle)?;
    let s = string(receiver);
    let count = if needle.is_empty() {
        s.chars().count().saturating_add(1)
    } else {
        s.matches(needle).count()
    };
    Ok(Value::from(count))
}

fn dict_keys(receiver: &Value, args: Args) -> EvalResult<Value> {
    args.exact::<0>("keys")?;
    receiver.iterate().map(Value::from)
}

fn dict_values(receiver: &Value, args: Args) -> EvalResult<Value> {
    args.exact::<0>("values")?;
    let values = receiver
        .as_map()
        .map(|map| map.values().cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    Ok(Value::from(values))
}

fn dict_items(receiver: &Value, args: Args) -> EvalResult<Value> {
    args.exact::<0>("items")?;
    let items = receiver
        .as_map()
        .map(|map| {
            map.iter()
                .map(|(key, value)| Value::List(Arc::new(vec![Value::from(key.as_str()), value.clone()])))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(Value::from(items))
}

fn dict_get(receiver: &Value, args: Args) -> EvalResult<Value> {
    let mut args = args.between("get", 1, 2)?.into_iter();
    let key = args.next().unwrap_or_default();
    let default = args.next().unwrap_or_default();
    Ok(receiver
        .as_map()
        .and_then(|map| map.get(&key.to_key()))
        .cloned()
        .unwrap_or(default))
}
