use crate::ast::Span;

pub type PlinthResult<T> = std::result::Result<T, Error>;

pub type EvalResult<T> = std::result::Result<T, EvalError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SyntaxErrorKind {
    #[error("unterminated marker (expected '{delimiter}')")]
    UnterminatedMarker { delimiter: String },
    #[error("expected a tag name")]
    MissingTagName,
    #[error("unknown tag '{tag}'")]
    UnknownTag { tag: String },
    #[error("unexpected tag '{tag}' (expected {expected})")]
    UnexpectedTag { tag: String, expected: String },
    #[error("unexpected end of template (expected {expected})")]
    UnexpectedEof { expected: String },
    #[error("tag '{tag}' takes no arguments")]
    UnexpectedArguments { tag: String },
    #[error("{message} in expression '{expression}' at offset {offset}")]
    Expression {
        expression: String,
        offset: usize,
        message: String,
    },
    #[error("invalid extends: {reason}")]
    InvalidExtends { reason: String },
    #[error("block '{name}' is defined more than once")]
    DuplicateBlock { name: String },
    #[error("endblock '{found}' does not close block '{expected}'")]
    MismatchedEndblock { expected: String, found: String },
    #[error("tags are nested more than {limit} levels deep")]
    NestedTooDeeply { limit: usize },
}

/// A lexer or parser failure. Nothing is compiled when one is raised.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("syntax error in template '{template}' at line {line}, column {column}: {kind}")]
pub struct SyntaxError {
    pub template: String,
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: SyntaxErrorKind,
}

impl SyntaxError {
    pub(crate) fn new(template: &str, span: Span, kind: SyntaxErrorKind) -> Self {
        Self {
            template: template.to_owned(),
            line: span.line,
            column: span.column,
            kind,
        }
    }

    pub const fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }
}

/// Raised by a [`TemplateLoader`](crate::TemplateLoader) for unknown names.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("template not found: {name}")]
pub struct NotFoundError {
    pub name: String,
}

impl NotFoundError {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self { name: name.into() }
    }
}

/// Failures while resolving `extends` and `include` references.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompositionError {
    #[error("template '{template}' extends '{parent}', which does not exist")]
    MissingParent { template: String, parent: String },
    #[error("circular extends: {}", .chain.join(" -> "))]
    CircularExtends { chain: Vec<String> },
    #[error("block '{name}' includes itself")]
    RecursiveBlock { name: String },
    #[error("included template '{name}' does not exist")]
    MissingInclude { name: String },
    #[error("included template '{name}' failed to compile: {source}")]
    InvalidInclude {
        name: String,
        #[source]
        source: Box<Error>,
    },
    #[error("include of '{name}' exceeds the maximum include depth of {limit}")]
    IncludeDepthExceeded { name: String, limit: usize },
    #[error("cannot include '{name}': the template has no environment to load it from")]
    NoEnvironment { name: String },
}

/// The coarse category an [`EvalError`] belongs to.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Name,
    Lookup,
    Type,
    Arithmetic,
    Composition,
    Recursion,
}

/// An evaluation failure. Aborts the current render only.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("name '{name}' is not defined")]
    UndefinedName { name: String },
    #[error("'{type_name}' value has no attribute '{attribute}'")]
    UndefinedAttribute {
        type_name: String,
        attribute: String,
    },
    #[error("index {index} is out of range for a sequence of length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("key '{key}' not found")]
    MissingKey { key: String },
    #[error("{message}")]
    Lookup { message: String },
    #[error("{message}")]
    Type { message: String },
    #[error("{message}")]
    Arithmetic { message: String },
    #[error(transparent)]
    Composition(#[from] CompositionError),
    #[error("maximum call depth of {limit} exceeded")]
    RecursionLimit { limit: usize },
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UndefinedName { .. } => ErrorKind::Name,
            Self::UndefinedAttribute { .. }
            | Self::IndexOutOfRange { .. }
            | Self::MissingKey { .. }
            | Self::Lookup { .. } => ErrorKind::Lookup,
            Self::Type { .. } => ErrorKind::Type,
            Self::Arithmetic { .. } => ErrorKind::Arithmetic,
            Self::Composition(_) => ErrorKind::Composition,
            Self::RecursionLimit { .. } => ErrorKind::Recursion,
        }
    }

    pub(crate) fn type_error<M: Into<String>>(message: M) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    pub(crate) fn arithmetic<M: Into<String>>(message: M) -> Self {
        Self::Arithmetic {
            message: message.into(),
        }
    }

    pub(crate) fn lookup<M: Into<String>>(message: M) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }
}

/// A failed render, pointing at the statement that raised the root cause.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("error rendering template '{template}' at {span}: {source}")]
pub struct RenderError {
    pub template: String,
    pub span: Span,
    pub source: EvalError,
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("template already exists: {name}")]
    TemplateExists { name: String },
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Composition(#[from] CompositionError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_syntax_error_display() {
        let err = SyntaxError::new(
            "page",
            Span::new(2, 4),
            SyntaxErrorKind::UnknownTag {
                tag: "while".to_owned(),
            },
        );
        assert_eq!(
            err.to_string(),
            "syntax error in template 'page' at line 2, column 4: unknown tag 'while'"
        );
        assert!(err.source().is_some());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_render_error_keeps_root_cause() {
        let err = RenderError {
            template: "page".to_owned(),
            span: Span::new(1, 7),
            source: EvalError::UndefinedName {
                name: "user".to_owned(),
            },
        };
        assert_eq!(err.kind(), ErrorKind::Name);
        assert_eq!(
            err.to_string(),
            "error rendering template 'page' at line 1, column 7: name 'user' is not defined"
        );
        assert_eq!(
            err.source().map(|source| source.to_string()),
            Some("name 'user' is not defined".to_owned())
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_kinds() {
        assert_eq!(
            EvalError::IndexOutOfRange { index: 4, len: 2 }.kind(),
            ErrorKind::Lookup
        );
        assert_eq!(
            EvalError::arithmetic("division by zero").kind(),
            ErrorKind::Arithmetic
        );
        assert_eq!(
            EvalError::from(CompositionError::MissingInclude {
                name: "nav".to_owned()
            })
            .kind(),
            ErrorKind::Composition
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_circular_extends_display() {
        let err = CompositionError::CircularExtends {
            chain: vec!["a".to_owned(), "b".to_owned(), "a".to_owned()],
        };
        assert_eq!(err.to_string(), "circular extends: a -> b -> a");
    }
}
