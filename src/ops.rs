//! Operator semantics over [`Value`]s.
//!
//! Integers use checked arithmetic, mixing an int with a float promotes to
//! float, and no other implicit conversion happens. `and`/`or` short-circuit
//! and live in the evaluator.

use std::{cmp::Ordering, sync::Arc};

use crate::{
    ast::{BinOp, UnaryOp},
    error::{EvalError, EvalResult},
    value::Value,
};

fn unsupported(op: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

/// Longest string (in bytes) or list a single operation may build.
pub(crate) const MAX_SEQUENCE_LEN: usize = 1 << 24;

fn overflow() -> EvalError {
    EvalError::arithmetic("integer overflow")
}

/// Length of `len` items repeated `count` times, if it stays within
/// [`MAX_SEQUENCE_LEN`].
fn repeated_len(len: usize, count: usize) -> EvalResult<usize> {
    len.checked_mul(count)
        .filter(|total| *total <= MAX_SEQUENCE_LEN)
        .ok_or_else(|| EvalError::arithmetic("repeated sequence is too long"))
}

fn division_by_zero() -> EvalError {
    EvalError::arithmetic("division by zero")
}

/// Both operands as floats, when both are numbers and at least one is a float.
fn as_floats(left: &Value, right: &Value) -> Option<(f64, f64)> {
    match (left, right) {
        (Value::Float(a), Value::Float(b)) => Some((*a, *b)),
        (Value::Int(a), Value::Float(b)) => Some((*a as f64, *b)),
        (Value::Float(a), Value::Int(b)) => Some((*a, *b as f64)),
        _ => None,
    }
}

pub(crate) fn binary(op: BinOp, left: &Value, right: &Value) -> EvalResult<Value> {
    match op {
        BinOp::Add => add(left, right),
        BinOp::Sub => sub(left, right),
        BinOp::Mul => mul(left, right),
        BinOp::Div => div(left, right),
        BinOp::FloorDiv => floor_div(left, right),
        BinOp::Mod => modulo(left, right),
        BinOp::Eq => Ok(Value::Bool(left == right)),
        BinOp::Ne => Ok(Value::Bool(left != right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = partial_compare(op.symbol(), left, right)?;
            Ok(Value::Bool(ordering.is_some_and(|ordering| match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })))
        }
        BinOp::In => contains(right, left).map(Value::Bool),
        BinOp::NotIn => contains(right, left).map(|found| Value::Bool(!found)),
        BinOp::And | BinOp::Or => Err(EvalError::type_error(format!(
            "'{}' must be evaluated lazily",
            op.symbol()
        ))),
    }
}

fn add(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
        (Value::String(a), Value::String(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::from(joined))
        }
        (Value::List(a), Value::List(b)) => {
            let mut joined = Vec::with_capacity(a.len() + b.len());
            joined.extend(a.iter().cloned());
            joined.extend(b.iter().cloned());
            Ok(Value::List(Arc::new(joined)))
        }
        _ => as_floats(left, right)
            .map(|(a, b)| Value::Float(a + b))
            .ok_or_else(|| unsupported("+", left, right)),
    }
}

fn sub(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
        _ => as_floats(left, right)
            .map(|(a, b)| Value::Float(a - b))
            .ok_or_else(|| unsupported("-", left, right)),
    }
}

fn mul(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
        (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) => {
            let count = usize::try_from(*n).unwrap_or(0);
            repeated_len(s.len(), count)?;
            Ok(Value::from(s.repeat(count)))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
            let count = usize::try_from(*n).unwrap_or(0);
            let len = repeated_len(items.len(), count)?;
            let mut repeated = Vec::with_capacity(len);
            for _ in 0..count {
                repeated.extend(items.iter().cloned());
            }
            Ok(Value::List(Arc::new(repeated)))
        }
        _ => as_floats(left, right)
            .map(|(a, b)| Value::Float(a * b))
            .ok_or_else(|| unsupported("*", left, right)),
    }
}

fn div(left: &Value, right: &Value) -> EvalResult<Value> {
    let (a, b) = match (left, right) {
        (Value::Int(a), Value::Int(b)) => (*a as f64, *b as f64),
        _ => as_floats(left, right).ok_or_else(|| unsupported("/", left, right))?,
    };
    if b == 0.0 {
        return Err(division_by_zero());
    }
    Ok(Value::Float(a / b))
}

fn floor_div(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err(division_by_zero()),
        (Value::Int(a), Value::Int(b)) => {
            let quotient = a.checked_div(*b).ok_or_else(overflow)?;
            let adjust = a % b != 0 && ((*a < 0) != (*b < 0));
            Ok(Value::Int(if adjust { quotient - 1 } else { quotient }))
        }
        _ => {
            let (a, b) = as_floats(left, right).ok_or_else(|| unsupported("//", left, right))?;
            if b == 0.0 {
                return Err(division_by_zero());
            }
            Ok(Value::Float((a / b).floor()))
        }
    }
}

/// Modulo takes the sign of the divisor.
fn modulo(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err(division_by_zero()),
        (Value::Int(a), Value::Int(b)) => {
            let remainder = a.checked_rem(*b).ok_or_else(overflow)?;
            let adjust = remainder != 0 && ((remainder < 0) != (*b < 0));
            Ok(Value::Int(if adjust { remainder + b } else { remainder }))
        }
        _ => {
            let (a, b) = as_floats(left, right).ok_or_else(|| unsupported("%", left, right))?;
            if b == 0.0 {
                return Err(division_by_zero());
            }
            let remainder = a % b;
            let adjust = remainder != 0.0 && ((remainder < 0.0) != (b < 0.0));
            Ok(Value::Float(if adjust { remainder + b } else { remainder }))
        }
    }
}

pub(crate) fn unary(op: UnaryOp, operand: &Value) -> EvalResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_true())),
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, value @ (Value::Int(_) | Value::Float(_))) => Ok(value.clone()),
        (UnaryOp::Neg | UnaryOp::Pos, value) => Err(EvalError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            value.type_name()
        ))),
    }
}

/// Orders two values of comparable kinds. `None` means unordered (NaN).
fn partial_compare(op: &str, left: &Value, right: &Value) -> EvalResult<Option<Ordering>> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
        (Value::Bool(a), Value::Bool(b)) => Ok(Some(a.cmp(b))),
        (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                if x != y {
                    return partial_compare(op, x, y);
                }
            }
            Ok(Some(a.len().cmp(&b.len())))
        }
        _ => as_floats(left, right)
            .map(|(a, b)| a.partial_cmp(&b))
            .ok_or_else(|| {
                EvalError::type_error(format!(
                    "'{op}' not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ))
            }),
    }
}

/// Total order used by `sorted`, `min` and `max`. NaN compares equal.
pub(crate) fn compare(left: &Value, right: &Value) -> EvalResult<Ordering> {
    Ok(partial_compare("<", left, right)?.unwrap_or(Ordering::Equal))
}

/// Membership test for `item in container`.
pub(crate) fn contains(container: &Value, item: &Value) -> EvalResult<bool> {
    match container {
        Value::String(haystack) => match item {
            Value::String(needle) => Ok(haystack.contains(&**needle)),
            other => Err(EvalError::type_error(format!(
                "'in <string>' requires string as left operand, not '{}'",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.iter().any(|candidate| candidate == item)),
        Value::Map(map) => Ok(map.contains_key(&item.to_key())),
        Value::Object(_) => Ok(container.iterate()?.iter().any(|candidate| candidate == item)),
        other => Err(EvalError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrorKind;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_integer_arithmetic() {
        assert_eq!(binary(BinOp::Add, &int(2), &int(3)).unwrap(), int(5));
        assert_eq!(binary(BinOp::Sub, &int(2), &int(3)).unwrap(), int(-1));
        assert_eq!(binary(BinOp::Mul, &int(4), &int(3)).unwrap(), int(12));
        assert_eq!(
            binary(BinOp::Div, &int(7), &int(2)).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_floor_division_and_modulo_round_down() {
        assert_eq!(binary(BinOp::FloorDiv, &int(7), &int(2)).unwrap(), int(3));
        assert_eq!(binary(BinOp::FloorDiv, &int(-7), &int(2)).unwrap(), int(-4));
        assert_eq!(binary(BinOp::Mod, &int(-7), &int(2)).unwrap(), int(1));
        assert_eq!(binary(BinOp::Mod, &int(7), &int(-2)).unwrap(), int(-1));
        assert_eq!(
            binary(BinOp::Mod, &Value::Float(-1.5), &int(1)).unwrap(),
            Value::Float(0.5)
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_division_by_zero() {
        for op in [BinOp::Div, BinOp::FloorDiv, BinOp::Mod] {
            let err = binary(op, &int(1), &int(0)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Arithmetic);
            assert_eq!(err.to_string(), "division by zero");
        }
        let err = binary(BinOp::Div, &Value::Float(1.0), &Value::Float(0.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_overflow_is_an_error() {
        let err = binary(BinOp::Add, &int(i64::MAX), &int(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
        let err = unary(UnaryOp::Neg, &int(i64::MIN)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_numeric_promotion() {
        assert_eq!(
            binary(BinOp::Add, &int(1), &Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            binary(BinOp::Lt, &int(1), &Value::Float(1.5)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_no_implicit_coercion() {
        let err = binary(BinOp::Add, &int(1), &Value::from("a")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported operand type(s) for +: 'int' and 'str'"
        );
        let err = binary(BinOp::Lt, &int(1), &Value::from("a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_sequences() {
        assert_eq!(
            binary(BinOp::Add, &Value::from("ab"), &Value::from("c")).unwrap(),
            Value::from("abc")
        );
        assert_eq!(
            binary(BinOp::Mul, &Value::from("ab"), &int(2)).unwrap(),
            Value::from("abab")
        );
        assert_eq!(
            binary(BinOp::Mul, &Value::from(vec![1]), &int(3)).unwrap(),
            Value::from(vec![1, 1, 1])
        );
        assert_eq!(
            binary(BinOp::Add, &Value::from(vec![1]), &Value::from(vec![2])).unwrap(),
            Value::from(vec![1, 2])
        );
        assert_eq!(
            binary(BinOp::Lt, &Value::from(vec![1, 2]), &Value::from(vec![1, 3])).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_oversized_repetition_is_an_error() {
        let cases = [
            (Value::from("ab"), int(9_000_000_000_000_000_000)),
            (int(1_000_000_000_000_000_000), Value::from(vec![0])),
            (Value::from("x"), int(i64::MAX)),
            (Value::from(vec![1, 2]), int(1 << 23 | 1)),
        ];
        for (left, right) in cases {
            let err = binary(BinOp::Mul, &left, &right).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Arithmetic);
            assert_eq!(err.to_string(), "repeated sequence is too long");
        }

        let at_limit = binary(BinOp::Mul, &Value::from("a"), &int(1 << 24)).unwrap();
        let Value::String(at_limit) = at_limit else {
            panic!("expected a string");
        };
        assert_eq!(at_limit.len(), MAX_SEQUENCE_LEN);
        assert_eq!(
            binary(BinOp::Mul, &Value::from("ab"), &int(-3)).unwrap(),
            Value::from("")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_membership() {
        let list = Value::from(vec![1, 2]);
        assert_eq!(binary(BinOp::In, &int(2), &list).unwrap(), Value::Bool(true));
        assert_eq!(
            binary(BinOp::NotIn, &int(3), &list).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            binary(BinOp::In, &Value::from("ell"), &Value::from("hello")).unwrap(),
            Value::Bool(true)
        );
        let map: Value = [("a", 1)].into_iter().collect();
        assert_eq!(binary(BinOp::In, &Value::from("a"), &map).unwrap(), Value::Bool(true));
        assert!(contains(&int(1), &int(1)).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unary() {
        assert_eq!(unary(UnaryOp::Neg, &int(3)).unwrap(), int(-3));
        assert_eq!(unary(UnaryOp::Not, &int(0)).unwrap(), Value::Bool(true));
        assert_eq!(
            unary(UnaryOp::Neg, &Value::from("x")).unwrap_err().to_string(),
            "bad operand type for unary -: 'str'"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nan_is_unordered() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(binary(BinOp::Lt, &nan, &int(1)).unwrap(), Value::Bool(false));
        assert_eq!(binary(BinOp::Ge, &nan, &int(1)).unwrap(), Value::Bool(false));
        assert_eq!(compare(&nan, &int(1)).unwrap(), Ordering::Equal);
    }
}
