use std::sync::{Arc, Weak};

use crate::{
    ast::Node,
    builtins::Functions,
    config::Config,
    engine::Shared,
    error::RenderError,
    eval::Evaluator,
    interface::Context,
    render::Renderer,
    scope::Scope,
};

/// A compiled template, with any inheritance already resolved.
///
/// Templates are immutable once built. They can be rendered any number of
/// times, from any number of threads, with different contexts; each call
/// builds its own scope and output buffer.
///
/// # Example
///
/// ```rust
/// use plinth::{compile, context};
///
/// let template = compile("Hello, {{ name }}!", "greeting").unwrap();
///
/// let output = template.render(&context! { name => "World" }).unwrap();
/// assert_eq!(output, "Hello, World!");
///
/// // A failed render leaves the template usable.
/// assert!(template.render(&context! {}).is_err());
/// assert_eq!(template.render(&context! { name => "again" }).unwrap(), "Hello, again!");
/// ```
#[derive(Debug)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
    parent: Option<String>,
    config: Config,
    functions: Arc<Functions>,
    env: Weak<Shared>,
}

impl Template {
    pub(crate) const fn new(
        name: String,
        nodes: Vec<Node>,
        parent: Option<String>,
        config: Config,
        functions: Arc<Functions>,
        env: Weak<Shared>,
    ) -> Self {
        Self {
            name,
            nodes,
            parent,
            config,
            functions,
            env,
        }
    }

    /// The name the template was compiled under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The template named by this template's `extends` tag, if any.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Renders the template with `context`.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`] carrying the root cause and the position of
    /// the statement that raised it. No partial output is returned.
    #[tracing::instrument(level = "debug", skip_all, fields(template = %self.name))]
    pub fn render(&self, context: &Context) -> Result<String, RenderError> {
        let mut out = String::new();
        self.render_to(context, &mut out)?;
        Ok(out)
    }

    /// Renders the template, appending to `out`.
    ///
    /// On failure `out` keeps whatever was written before the error. It is
    /// the caller's job to discard it.
    ///
    /// # Errors
    ///
    /// See [`Template::render`].
    pub fn render_to(&self, context: &Context, out: &mut String) -> Result<(), RenderError> {
        let evaluator = Evaluator::new(&self.functions, self.config.max_call_depth);
        let renderer = Renderer::new(evaluator, &self.config, &self.env);
        let scope = Scope::root(context.to_vars());
        renderer.render(self, &scope, 0, out)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{compile, context};

    #[test]
    #[ntest::timeout(100)]
    fn test_render_to_keeps_partial_output() {
        let template = compile("before {{ missing }} after", "partial").unwrap();
        let mut out = String::new();
        let err = template.render_to(&Context::new(), &mut out).unwrap_err();
        assert_eq!(out, "before ");
        assert_eq!(err.template, "partial");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_metadata() {
        let template = compile("{{ 1 }}", "page").unwrap();
        assert_eq!(template.name(), "page");
        assert_eq!(template.parent(), None);
        assert_eq!(template.render(&context! {}).unwrap(), "1");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_templates_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Template>();
    }
}
