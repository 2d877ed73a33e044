//! `plinth` compiles text templates into reusable render programs.
//!
//! ```text
//! Hello, {{ user.name }}!
//! {% for item in items %}
//!   {{ item.upper() }}
//! {% else %}
//!   nothing to show
//! {% endfor %}
//! ```
//!
//! Templates support `{{ expression }}` interpolation and the tags
//! `if`/`elif`/`else`/`endif`, `for`/`else`/`endfor`, `block`/`endblock`,
//! `extends "name"` and `include EXPR [with EXPR]`. Write `\{{` or `\{%` for a
//! literal delimiter.
//!
//! Expressions are evaluated in a sandbox: they see the render context, the
//! functions in the environment's [`Functions`] table, the methods of the
//! builtin value kinds and the attributes an [`Object`] chooses to expose.
//!
//! ```
//! use plinth::{compile, context};
//!
//! let template = compile("{{ list(map(lambda x: x * 2, items)) }}", "double").unwrap();
//! let output = template.render(&context! { items => vec![1, 2, 3] }).unwrap();
//! assert_eq!(output, "[2, 4, 6]");
//! ```

mod ast;
mod builtins;
mod cache;
mod compose;
mod config;
mod engine;
mod error;
mod eval;
mod expr;
mod interface;
mod lexer;
mod methods;
mod ops;
mod parser;
mod render;
mod scope;
mod template;
mod value;

// Public exports.
pub use ast::Span;
pub use builtins::Functions;
pub use config::Config;
pub use engine::{Environment, EnvironmentBuilder};
pub use error::{
    CompositionError, Error, ErrorKind, EvalError, EvalResult, NotFoundError, PlinthResult, RenderError,
    SyntaxError, SyntaxErrorKind,
};
pub use eval::Evaluator;
pub use interface::{Context, MapLoader, TemplateLoader};
pub use template::Template;
pub use value::{Args, Callable, Function, Lambda, Map, NativeFn, Object, Record, Value};

/// Compiles a standalone template.
///
/// The template has no environment behind it, so `extends` fails to compile
/// and `include` fails when rendered. Use an [`Environment`] for templates
/// that refer to each other.
///
/// # Errors
///
/// * `Error::Syntax` if the source is malformed
/// * `Error::Composition` if the source extends another template
pub fn compile(source: &str, name: &str) -> PlinthResult<Template> {
    let env = Environment::builder().cache_capacity(0).build();
    env.add_template(name, source)?;
    env.compile(name)
}
