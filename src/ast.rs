use std::{fmt, sync::Arc};

use crate::value::Value;

/// A position inside a template source. Lines and columns are 1-indexed, the
/// column counts bytes from the start of the line.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Returns the position reached after walking over `text` from `self`.
    pub(crate) fn advance(self, text: &str) -> Self {
        let mut span = self;
        for c in text.chars() {
            if c == '\n' {
                span.line += 1;
                span.column = 1;
            } else {
                span.column += c.len_utf8();
            }
        }
        span
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    And,
    Or,
}

impl BinOp {
    pub(crate) const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Pos,
}

/// An embedded expression, as found inside `{{ }}` and tag arguments.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Name(String),
    Attribute {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        key: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// The body is shared with every closure created from this node.
    Lambda {
        params: Vec<String>,
        body: Arc<Expr>,
    },
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
}

/// One `if`/`elif` arm.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Branch {
    pub condition: Expr,
    pub body: Vec<Node>,
    pub span: Span,
}

/// A statement of the template tree. A template is a `Vec<Node>`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    /// A constant block of text, with escapes already processed.
    Text(String),
    Print {
        expr: Expr,
        span: Span,
    },
    /// The first branch is the `if`, the rest are `elif`s in source order.
    If {
        branches: Vec<Branch>,
        else_body: Option<Vec<Node>>,
    },
    For {
        targets: Vec<String>,
        iterable: Expr,
        body: Vec<Node>,
        /// Runs when the iterable is empty.
        else_body: Option<Vec<Node>>,
        span: Span,
    },
    Block {
        name: String,
        body: Vec<Node>,
        span: Span,
    },
    Extends {
        parent: String,
        span: Span,
    },
    Include {
        name: Expr,
        with: Option<Expr>,
        span: Span,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_span_advance() {
        let span = Span::new(3, 5);
        assert_eq!(span.advance(""), span);
        assert_eq!(span.advance("ab"), Span::new(3, 7));
        assert_eq!(span.advance("ab\ncd"), Span::new(4, 3));
        assert_eq!(span.advance("\n"), Span::new(4, 1));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_span_display() {
        assert_eq!(Span::new(2, 9).to_string(), "line 2, column 9");
    }
}
