use std::{cell::Cell, collections::HashMap, sync::Arc};

use crate::{
    ast::{BinOp, Expr},
    builtins::Functions,
    error::{EvalError, EvalResult},
    methods::{self, Method},
    ops,
    scope::Scope,
    value::{Args, Callable, Function, Lambda, Map, Value},
};

/// Evaluates expressions for one render call.
///
/// Native functions receive the evaluator so they can call back into
/// template-defined callables, as `map` and `sorted(key=...)` do.
#[derive(Debug)]
pub struct Evaluator<'a> {
    functions: &'a Functions,
    max_call_depth: usize,
    call_depth: Cell<usize>,
}

impl<'a> Evaluator<'a> {
    pub(crate) const fn new(functions: &'a Functions, max_call_depth: usize) -> Self {
        Self {
            functions,
            max_call_depth,
            call_depth: Cell::new(0),
        }
    }

    /// Calls `callee` with `args`.
    ///
    /// Fails with a type error if `callee` is not callable, and with a
    /// recursion error once calls nest deeper than the configured limit.
    pub fn call(&self, callee: &Value, args: Args) -> EvalResult<Value> {
        let depth = self.call_depth.get();
        if depth >= self.max_call_depth {
            return Err(EvalError::RecursionLimit {
                limit: self.max_call_depth,
            });
        }

        self.call_depth.set(depth.saturating_add(1));
        let result = match callee {
            Value::Callable(Callable::Function(function)) => function.invoke(self, args),
            Value::Callable(Callable::Lambda(lambda)) => self.call_lambda(lambda, args),
            other => Err(EvalError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        };
        self.call_depth.set(depth);
        result
    }

    fn call_lambda(&self, lambda: &Lambda, args: Args) -> EvalResult<Value> {
        let (positional, keyword) = args.into_parts();
        if positional.len() > lambda.params.len() {
            return Err(EvalError::type_error(format!(
                "<lambda>() takes {} positional argument(s) but {} were given",
                lambda.params.len(),
                positional.len()
            )));
        }

        let mut vars: HashMap<String, Value> = lambda
            .params
            .iter()
            .cloned()
            .zip(positional)
            .collect();
        for (name, value) in keyword {
            if !lambda.params.contains(&name) {
                return Err(EvalError::type_error(format!(
                    "<lambda>() got an unexpected keyword argument '{name}'"
                )));
            }
            if vars.contains_key(&name) {
                return Err(EvalError::type_error(format!(
                    "<lambda>() got multiple values for argument '{name}'"
                )));
            }
            vars.insert(name, value);
        }
        if let Some(missing) = lambda.params.iter().find(|param| !vars.contains_key(*param)) {
            return Err(EvalError::type_error(format!(
                "<lambda>() missing required argument '{missing}'"
            )));
        }

        let scope = Scope::child(&lambda.scope, vars);
        self.eval(&lambda.body, &scope)
    }

    pub(crate) fn eval(&self, expr: &Expr, scope: &Arc<Scope>) -> EvalResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self.lookup_name(name, scope),
            Expr::Attribute { target, name } => {
                let target = self.eval(target, scope)?;
                get_attr(&target, name)
            }
            Expr::Index { target, key } => {
                let target = self.eval(target, scope)?;
                let key = self.eval(key, scope)?;
                get_item(&target, &key)
            }
            Expr::Call {
                callee,
                args,
                kwargs,
            } => {
                // Methods are dispatched directly rather than through a bound
                // callable.
                let callee = match callee.as_ref() {
                    Expr::Attribute { target, name } => {
                        let receiver = self.eval(target, scope)?;
                        if let Some(method) = methods::lookup(&receiver, name) {
                            let args = self.eval_args(args, kwargs, scope)?;
                            return method(&receiver, args);
                        }
                        get_attr(&receiver, name)?
                    }
                    other => self.eval(other, scope)?,
                };
                let args = self.eval_args(args, kwargs, scope)?;
                self.call(&callee, args)
            }
            Expr::Binary {
                op: BinOp::And,
                left,
                right,
            } => {
                let left = self.eval(left, scope)?;
                if left.is_true() {
                    self.eval(right, scope)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary {
                op: BinOp::Or,
                left,
                right,
            } => {
                let left = self.eval(left, scope)?;
                if left.is_true() {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                ops::binary(*op, &left, &right)
            }
            Expr::Unary { op, operand } => ops::unary(*op, &self.eval(operand, scope)?),
            Expr::Lambda { params, body } => Ok(Value::Callable(Callable::Lambda(Arc::new(
                Lambda {
                    params: params.clone(),
                    body: Arc::clone(body),
                    scope: Arc::clone(scope),
                },
            )))),
            Expr::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item, scope))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::List(Arc::new(items)))
            }
            Expr::Dict(pairs) => {
                let mut map = Map::new();
                for (key, value) in pairs {
                    let key = self.eval(key, scope)?.to_key();
                    map.insert(key, self.eval(value, scope)?);
                }
                Ok(Value::Map(Arc::new(map)))
            }
        }
    }

    /// Scope first, then the function table.
    fn lookup_name(&self, name: &str, scope: &Scope) -> EvalResult<Value> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value.clone());
        }
        self.functions
            .get(name)
            .map(|function| Value::from(function.clone()))
            .ok_or_else(|| EvalError::UndefinedName {
                name: name.to_owned(),
            })
    }

    fn eval_args(
        &self,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        scope: &Arc<Scope>,
    ) -> EvalResult<Args> {
        let positional = args
            .iter()
            .map(|arg| self.eval(arg, scope))
            .collect::<EvalResult<Vec<_>>>()?;
        let keyword = kwargs
            .iter()
            .map(|(name, arg)| Ok((name.clone(), self.eval(arg, scope)?)))
            .collect::<EvalResult<Vec<_>>>()?;
        Ok(Args::new(positional, keyword))
    }
}

fn undefined_attribute(target: &Value, name: &str) -> EvalError {
    EvalError::UndefinedAttribute {
        type_name: target.type_name().to_owned(),
        attribute: name.to_owned(),
    }
}

/// A method detached from its call, keeping the receiver alive.
fn bind(receiver: &Value, name: &str, method: Method) -> Value {
    let receiver = receiver.clone();
    Value::from(Function::new(name, move |_, args| method(&receiver, args)))
}

fn get_attr(target: &Value, name: &str) -> EvalResult<Value> {
    match target {
        Value::Object(object) => object
            .get_attr(name)
            .ok_or_else(|| undefined_attribute(target, name)),
        Value::Map(map) => match methods::lookup(target, name) {
            Some(method) => Ok(bind(target, name, method)),
            None => map
                .get(name)
                .cloned()
                .ok_or_else(|| undefined_attribute(target, name)),
        },
        other => methods::lookup(other, name)
            .map(|method| bind(other, name, method))
            .ok_or_else(|| undefined_attribute(other, name)),
    }
}

/// Resolves a possibly negative index against a sequence of `len` items.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index < 0 {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        len.checked_sub(back)
    } else {
        usize::try_from(index).ok().filter(|index| *index < len)
    }
}

fn get_item(target: &Value, key: &Value) -> EvalResult<Value> {
    match (target, key) {
        (Value::List(items), Value::Int(index)) => resolve_index(*index, items.len())
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or(EvalError::IndexOutOfRange {
                index: *index,
                len: items.len(),
            }),
        (Value::String(s), Value::Int(index)) => {
            let len = s.chars().count();
            resolve_index(*index, len)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::from(c.to_string()))
                .ok_or(EvalError::IndexOutOfRange { index: *index, len })
        }
        (Value::List(_) | Value::String(_), other) => Err(EvalError::type_error(format!(
            "{} indices must be integers, not '{}'",
            target.type_name(),
            other.type_name()
        ))),
        (Value::Map(map), key) => {
            let key = key.to_key();
            map.get(&key)
                .cloned()
                .ok_or(EvalError::MissingKey { key })
        }
        (Value::Object(object), Value::String(name)) => object
            .get_attr(name)
            .ok_or_else(|| undefined_attribute(target, name)),
        (other, _) => Err(EvalError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{error::ErrorKind, expr::parse_expression, value::Record};

    fn scope(pairs: Vec<(&str, Value)>) -> Arc<Scope> {
        Scope::root(
            pairs
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
        )
    }

    fn eval_in(source: &str, scope: &Arc<Scope>) -> EvalResult<Value> {
        let functions = Functions::builtins();
        let evaluator = Evaluator::new(&functions, 64);
        evaluator.eval(&parse_expression(source).unwrap(), scope)
    }

    fn eval(source: &str) -> EvalResult<Value> {
        eval_in(source, &scope(vec![]))
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_builtin_calls() {
        assert_eq!(eval("abs(-3)").unwrap(), Value::Int(3));
        assert_eq!(eval("len([1,2,3])").unwrap(), Value::Int(3));
        assert_eq!(eval("[1,2,3].index(2)").unwrap(), Value::Int(1));
        assert_eq!(
            eval("list(map(lambda x: x * 2, [1, 2, 3]))").unwrap().to_string(),
            "[2, 4, 6]"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_scope_shadows_functions() {
        let scope = scope(vec![("len", Value::Int(7))]);
        assert_eq!(eval_in("len", &scope).unwrap(), Value::Int(7));
        let err = eval_in("len([])", &scope).unwrap_err();
        assert_eq!(err.to_string(), "'int' object is not callable");
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_undefined_name() {
        let err = eval("missing + 1").unwrap_err();
        assert_eq!(
            err,
            EvalError::UndefinedName {
                name: "missing".to_owned()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_short_circuit_returns_operand() {
        assert_eq!(eval("0 or 'x'").unwrap(), Value::from("x"));
        assert_eq!(eval("'' and undefined").unwrap(), Value::from(""));
        assert_eq!(eval("1 < 2 < 3").unwrap(), Value::Bool(true));
        assert_eq!(eval("not 1 == 2").unwrap(), Value::Bool(true));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_object_exposes_only_fields() {
        let object = Value::from_object(Record::new("A").with_field("a", 1).with_field("b", 2));
        let scope = scope(vec![("o", object)]);
        assert_eq!(eval_in("o.a + o['b']", &scope).unwrap(), Value::Int(3));
        let err = eval_in("o.type_name", &scope).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup);
        assert_eq!(err.to_string(), "'A' value has no attribute 'type_name'");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_indexing() {
        assert_eq!(eval("[1, 2, 3][-1]").unwrap(), Value::Int(3));
        assert_eq!(eval("'héllo'[1]").unwrap(), Value::from("é"));
        assert_eq!(
            eval("[1][5]").unwrap_err(),
            EvalError::IndexOutOfRange { index: 5, len: 1 }
        );
        assert_eq!(
            eval("{'a': 1}['b']").unwrap_err(),
            EvalError::MissingKey {
                key: "b".to_owned()
            }
        );
        assert_eq!(eval("{1: 'one'}[1]").unwrap(), Value::from("one"));
        assert_eq!(eval("5[0]").unwrap_err().kind(), ErrorKind::Type);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_dict_attributes() {
        let user: Value = [("name", "flango")].into_iter().collect();
        let scope = scope(vec![("user", user)]);
        assert_eq!(eval_in("user.name", &scope).unwrap(), Value::from("flango"));
        assert_eq!(
            eval_in("user.get('age', 3)", &scope).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            eval_in("user.keys", &scope)
                .map(|keys| matches!(keys, Value::Callable(_)))
                .unwrap(),
            true
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bound_methods() {
        assert_eq!(
            eval("list(map(', '.join, [['a', 'b'], ['c']]))")
                .unwrap()
                .to_string(),
            "['a, b', 'c']"
        );
        assert_eq!(eval("'abc'.nope").unwrap_err().kind(), ErrorKind::Lookup);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lambda_closure_and_binding() {
        let scope = scope(vec![("n", Value::Int(10))]);
        assert_eq!(
            eval_in("(lambda x, y: x + y + n)(1, y=2)", &scope).unwrap(),
            Value::Int(13)
        );
        let err = eval("(lambda x: x)()").unwrap_err();
        assert_eq!(err.to_string(), "<lambda>() missing required argument 'x'");
        let err = eval("(lambda x: x)(1, x=2)").unwrap_err();
        assert_eq!(
            err.to_string(),
            "<lambda>() got multiple values for argument 'x'"
        );
        let err = eval("(lambda: 1)(1)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_call_depth_limit() {
        let functions = Functions::builtins();
        let evaluator = Evaluator::new(&functions, 3);
        let nested = parse_expression("(lambda f: f(f))(lambda f: f(f))").unwrap();
        let err = evaluator.eval(&nested, &scope(vec![])).unwrap_err();
        assert_eq!(err, EvalError::RecursionLimit { limit: 3 });
        assert_eq!(err.kind(), ErrorKind::Recursion);

        // The depth counter unwinds after a failed call.
        let ok = parse_expression("(lambda: 1)()").unwrap();
        assert_eq!(evaluator.eval(&ok, &scope(vec![])).unwrap(), Value::Int(1));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_division_by_zero() {
        assert_eq!(eval("1 / 0").unwrap_err().kind(), ErrorKind::Arithmetic);
        assert_eq!(eval("7 // 2").unwrap(), Value::Int(3));
    }
}
