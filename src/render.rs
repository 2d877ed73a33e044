use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use crate::{
    ast::{Expr, Node, Span},
    builtins::escape_into,
    config::Config,
    engine::Shared,
    error::{CompositionError, EvalError, EvalResult, RenderError},
    eval::Evaluator,
    scope::Scope,
    template::Template,
    value::Value,
};

/// Walks a compiled tree, writing output into a caller-owned buffer.
///
/// One renderer serves a whole render call, includes included, so the
/// callable depth limit spans every template the call touches.
pub(crate) struct Renderer<'r> {
    evaluator: Evaluator<'r>,
    config: &'r Config,
    env: &'r Weak<Shared>,
}

impl<'r> Renderer<'r> {
    pub(crate) const fn new(
        evaluator: Evaluator<'r>,
        config: &'r Config,
        env: &'r Weak<Shared>,
    ) -> Self {
        Self {
            evaluator,
            config,
            env,
        }
    }

    pub(crate) fn render(
        &self,
        template: &Template,
        scope: &Arc<Scope>,
        depth: usize,
        out: &mut String,
    ) -> Result<(), RenderError> {
        let at = Location {
            template: template.name(),
            depth,
        };
        self.nodes(at, template.nodes(), scope, out)
    }

    fn nodes(
        &self,
        at: Location<'_>,
        nodes: &[Node],
        scope: &Arc<Scope>,
        out: &mut String,
    ) -> Result<(), RenderError> {
        for node in nodes {
            self.node(at, node, scope, out)?;
        }
        Ok(())
    }

    fn node(
        &self,
        at: Location<'_>,
        node: &Node,
        scope: &Arc<Scope>,
        out: &mut String,
    ) -> Result<(), RenderError> {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Print { expr, span } => {
                let value = self.eval(at, *span, expr, scope)?;
                self.write_value(&value, out);
            }
            Node::If {
                branches,
                else_body,
            } => {
                for branch in branches {
                    if self.eval(at, branch.span, &branch.condition, scope)?.is_true() {
                        return self.nodes(at, &branch.body, scope, out);
                    }
                }
                if let Some(else_body) = else_body {
                    self.nodes(at, else_body, scope, out)?;
                }
            }
            Node::For {
                targets,
                iterable,
                body,
                else_body,
                span,
            } => {
                let iterable = self.eval(at, *span, iterable, scope)?;
                let items = loop_items(&iterable, targets.len()).map_err(|err| at.error(*span, err))?;
                if items.is_empty() {
                    if let Some(else_body) = else_body {
                        self.nodes(at, else_body, scope, out)?;
                    }
                    return Ok(());
                }
                for item in items {
                    let vars = bind_targets(targets, item).map_err(|err| at.error(*span, err))?;
                    self.nodes(at, body, &Scope::child(scope, vars), out)?;
                }
            }
            Node::Block { body, .. } => {
                self.nodes(at, body, &Scope::child(scope, HashMap::new()), out)?;
            }
            // Resolved when the template was compiled.
            Node::Extends { .. } => {}
            Node::Include { name, with, span } => {
                self.include(at, *span, name, with.as_ref(), scope, out)?;
            }
        }
        Ok(())
    }

    fn eval(
        &self,
        at: Location<'_>,
        span: Span,
        expr: &Expr,
        scope: &Arc<Scope>,
    ) -> Result<Value, RenderError> {
        self.evaluator
            .eval(expr, scope)
            .map_err(|err| at.error(span, err))
    }

    fn write_value(&self, value: &Value, out: &mut String) {
        match value {
            Value::String(s) if !self.config.autoescape => out.push_str(s),
            Value::String(s) => escape_into(s, out),
            other if self.config.autoescape => escape_into(&other.to_string(), out),
            other => out.push_str(&other.to_string()),
        }
    }

    fn include(
        &self,
        at: Location<'_>,
        span: Span,
        name: &Expr,
        with: Option<&Expr>,
        scope: &Arc<Scope>,
        out: &mut String,
    ) -> Result<(), RenderError> {
        let target = self.eval(at, span, name, scope)?;
        let Some(target) = target.as_str() else {
            return Err(at.error(
                span,
                EvalError::type_error(format!(
                    "include expects a template name, got '{}'",
                    target.type_name()
                )),
            ));
        };

        let composition = |err: CompositionError| at.error(span, err.into());
        if at.depth >= self.config.max_include_depth {
            return Err(composition(CompositionError::IncludeDepthExceeded {
                name: target.to_owned(),
                limit: self.config.max_include_depth,
            }));
        }
        let Some(env) = self.env.upgrade() else {
            return Err(composition(CompositionError::NoEnvironment {
                name: target.to_owned(),
            }));
        };
        let included = env.include(target).map_err(composition)?;

        let scope = match with {
            Some(with) => match self.eval(at, span, with, scope)? {
                Value::Map(overrides) => Scope::child(
                    scope,
                    overrides
                        .iter()
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect(),
                ),
                other => {
                    return Err(at.error(
                        span,
                        EvalError::type_error(format!(
                            "include 'with' expects a dict, got '{}'",
                            other.type_name()
                        )),
                    ));
                }
            },
            None => Arc::clone(scope),
        };

        tracing::trace!(
            template = at.template,
            include = target,
            depth = at.depth,
            "rendering include"
        );
        self.render(&included, &scope, at.depth.saturating_add(1), out)
    }
}

/// Where in the include stack a node is being rendered.
#[derive(Debug, Clone, Copy)]
struct Location<'t> {
    template: &'t str,
    depth: usize,
}

impl Location<'_> {
    fn error(self, span: Span, source: EvalError) -> RenderError {
        RenderError {
            template: self.template.to_owned(),
            span,
            source,
        }
    }
}

/// The items a `for` loop visits. A dict iterated with two targets yields
/// `[key, value]` pairs, otherwise its keys.
fn loop_items(iterable: &Value, targets: usize) -> EvalResult<Vec<Value>> {
    match iterable {
        Value::Map(map) if targets == 2 => Ok(map
            .iter()
            .map(|(key, value)| Value::List(Arc::new(vec![Value::from(key.as_str()), value.clone()])))
            .collect()),
        other => other.iterate(),
    }
}

fn bind_targets(targets: &[String], item: Value) -> EvalResult<HashMap<String, Value>> {
    if let [target] = targets {
        return Ok(HashMap::from([(target.clone(), item)]));
    }

    let values = item.iterate().map_err(|_| {
        EvalError::type_error(format!(
            "cannot unpack non-iterable '{}' object",
            item.type_name()
        ))
    })?;
    if values.len() != targets.len() {
        return Err(EvalError::type_error(format!(
            "expected {} values to unpack, got {}",
            targets.len(),
            values.len()
        )));
    }
    Ok(targets.iter().cloned().zip(values).collect())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{Context, compile, context, error::ErrorKind};

    fn render(source: &str, context: &Context) -> Result<String, RenderError> {
        compile(source, "test").unwrap().render(context)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_for_else_runs_on_empty_iterable() {
        let source = "{% for x in items %}{{ x }}{% else %}empty{% endfor %}";
        assert_eq!(
            render(source, &context! { items => Vec::<i64>::new() }).unwrap(),
            "empty"
        );
        assert_eq!(
            render(source, &context! { items => vec![1, 2] }).unwrap(),
            "12"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_for_over_dict() {
        let scores: Value = [("a", 1), ("b", 2)].into_iter().collect();
        let context = context! { scores => scores };
        assert_eq!(
            render("{% for k, v in scores %}{{ k }}={{ v }};{% endfor %}", &context).unwrap(),
            "a=1;b=2;"
        );
        assert_eq!(
            render("{% for k in scores %}{{ k }}{% endfor %}", &context).unwrap(),
            "ab"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_for_unpacks_pairs() {
        assert_eq!(
            render(
                "{% for i, x in enumerate(['a', 'b'], start=1) %}{{ i }}{{ x }} {% endfor %}",
                &Context::new()
            )
            .unwrap(),
            "1a 2b "
        );
        let err = render("{% for a, b in [[1, 2, 3]] %}{% endfor %}", &Context::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(err.source.to_string(), "expected 2 values to unpack, got 3");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_loop_variable_does_not_leak() {
        let source = "{% for x in [1] %}{% endfor %}{{ x }}";
        let err = render(source, &Context::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Name);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_exactly_one_branch_runs() {
        let source = "{% if n > 2 %}big{% elif n > 0 %}small{% else %}none{% endif %}";
        assert_eq!(render(source, &context! { n => 5 }).unwrap(), "big");
        assert_eq!(render(source, &context! { n => 1 }).unwrap(), "small");
        assert_eq!(render(source, &context! { n => 0 }).unwrap(), "none");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_points_at_statement() {
        let err = render("line one\n  {{ 1 // 0 }}", &Context::new()).unwrap_err();
        assert_eq!(err.template, "test");
        assert_eq!(err.span, Span::new(2, 3));
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_include_without_environment() {
        let err = render("{% include 'nav' %}", &Context::new()).unwrap_err();
        assert_eq!(
            err.source,
            EvalError::Composition(CompositionError::NoEnvironment {
                name: "nav".to_owned()
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_include_name_must_be_string() {
        let err = render("{% include 3 %}", &Context::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }
}
