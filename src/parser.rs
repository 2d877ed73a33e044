use std::collections::HashSet;

use crate::{
    ast::{Branch, Expr, Node, Span},
    error::{SyntaxError, SyntaxErrorKind},
    expr::{ExprError, ExprParser},
    lexer::{self, Marked, Segment, Token},
    value::Value,
};

type ParseResult<T> = Result<T, SyntaxError>;

/// Tags that only make sense while a matching opener is being parsed.
const CONTINUATION_TAGS: [&str; 5] = ["elif", "else", "endif", "endfor", "endblock"];

/// How many `if`/`for`/`block` bodies may enclose one another.
const MAX_NESTING: usize = 64;

/// The tag that ended a body.
#[derive(Debug, Clone, Copy)]
struct Closing<'a> {
    name: &'a str,
    args: Marked<'a>,
    span: Span,
}

struct Parser<'a> {
    template: &'a str,
    tokens: std::vec::IntoIter<Token<'a>>,
    /// Position just past the last byte of the source.
    end_span: Span,
    /// How many statement bodies enclose the current position.
    depth: usize,
    blocks: HashSet<String>,
    extends_seen: bool,
    /// Set once anything other than whitespace or `extends` was parsed.
    content_seen: bool,
}

impl<'a> Parser<'a> {
    fn new(template: &'a str, source: &'a str, tokens: Vec<Token<'a>>) -> Self {
        Parser {
            template,
            tokens: tokens.into_iter(),
            end_span: Span::default().advance(source),
            depth: 0,
            blocks: HashSet::new(),
            extends_seen: false,
            content_seen: false,
        }
    }

    fn error(&self, span: Span, kind: SyntaxErrorKind) -> SyntaxError {
        SyntaxError::new(self.template, span, kind)
    }

    /// Converts an expression error into a positioned syntax error.
    fn expr_error(&self, marked: Marked<'_>, err: ExprError) -> SyntaxError {
        let leading = marked.text.len() - marked.text.trim_start().len();
        let span = marked
            .span
            .advance(marked.text.get(..err.offset).unwrap_or_default());
        self.error(
            span,
            SyntaxErrorKind::Expression {
                expression: marked.text.trim().to_owned(),
                offset: err.offset.saturating_sub(leading),
                message: err.message,
            },
        )
    }

    /// Runs `parse` over the marker text, requiring it to consume all of it.
    fn with_expr<'m, T>(
        &self,
        marked: Marked<'m>,
        parse: impl FnOnce(&mut ExprParser<'m>) -> Result<T, ExprError>,
    ) -> ParseResult<T> {
        let result = ExprParser::new(marked.text).and_then(|mut parser| {
            let value = parse(&mut parser)?;
            parser.expect_end()?;
            Ok(value)
        });
        result.map_err(|err| self.expr_error(marked, err))
    }

    fn parse_marked(&self, marked: Marked<'_>) -> ParseResult<Expr> {
        self.with_expr(marked, ExprParser::parse_expression)
    }

    fn expect_no_args(&self, closing: &Closing<'_>) -> ParseResult<()> {
        if closing.args.text.is_empty() {
            Ok(())
        } else {
            Err(self.error(
                closing.span,
                SyntaxErrorKind::UnexpectedArguments {
                    tag: closing.name.to_owned(),
                },
            ))
        }
    }

    /// Parses nodes until one of `ends` or the end of input.
    fn parse_body(&mut self, ends: &[&str]) -> ParseResult<(Vec<Node>, Option<Closing<'a>>)> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            match token.segment {
                Segment::Text(text) => {
                    if !text.trim().is_empty() {
                        self.content_seen = true;
                    }
                    nodes.push(Node::Text(text.into_owned()));
                }
                Segment::Expr(marked) => {
                    self.content_seen = true;
                    let expr = self.parse_marked(marked)?;
                    nodes.push(Node::Print {
                        expr,
                        span: token.span,
                    });
                }
                Segment::Tag { name, args } => {
                    if ends.contains(&name) {
                        return Ok((
                            nodes,
                            Some(Closing {
                                name,
                                args,
                                span: token.span,
                            }),
                        ));
                    }
                    if CONTINUATION_TAGS.contains(&name) {
                        return Err(self.error(
                            token.span,
                            SyntaxErrorKind::UnexpectedTag {
                                tag: name.to_owned(),
                                expected: describe(ends),
                            },
                        ));
                    }
                    let node = self.parse_tag(name, args, token.span)?;
                    nodes.push(node);
                }
            }
        }
        Ok((nodes, None))
    }

    /// Parses a nested body that must be closed by one of `ends`.
    fn parse_until(&mut self, ends: &[&str]) -> ParseResult<(Vec<Node>, Closing<'a>)> {
        self.depth += 1;
        let result = self.parse_body(ends);
        self.depth -= 1;
        match result? {
            (nodes, Some(closing)) => Ok((nodes, closing)),
            (_, None) => Err(self.error(
                self.end_span,
                SyntaxErrorKind::UnexpectedEof {
                    expected: describe(ends),
                },
            )),
        }
    }

    fn parse_tag(&mut self, name: &'a str, args: Marked<'a>, span: Span) -> ParseResult<Node> {
        if name == "extends" {
            return self.parse_extends(args, span);
        }
        self.content_seen = true;
        if matches!(name, "if" | "for" | "block") && self.depth >= MAX_NESTING {
            return Err(self.error(
                span,
                SyntaxErrorKind::NestedTooDeeply { limit: MAX_NESTING },
            ));
        }
        match name {
            "if" => self.parse_if(args, span),
            "for" => self.parse_for(args, span),
            "block" => self.parse_block(args, span),
            "include" => self.parse_include(args, span),
            _ => Err(self.error(
                span,
                SyntaxErrorKind::UnknownTag {
                    tag: name.to_owned(),
                },
            )),
        }
    }

    fn parse_if(&mut self, args: Marked<'a>, span: Span) -> ParseResult<Node> {
        let mut branches = Vec::new();
        let mut condition = self.parse_marked(args)?;
        let mut branch_span = span;

        loop {
            let (body, closing) = self.parse_until(&["elif", "else", "endif"])?;
            branches.push(Branch {
                condition,
                body,
                span: branch_span,
            });
            match closing.name {
                "elif" => {
                    condition = self.parse_marked(closing.args)?;
                    branch_span = closing.span;
                }
                "else" => {
                    self.expect_no_args(&closing)?;
                    let (else_body, end) = self.parse_until(&["endif"])?;
                    self.expect_no_args(&end)?;
                    return Ok(Node::If {
                        branches,
                        else_body: Some(else_body),
                    });
                }
                _ => {
                    self.expect_no_args(&closing)?;
                    return Ok(Node::If {
                        branches,
                        else_body: None,
                    });
                }
            }
        }
    }

    fn parse_for(&mut self, args: Marked<'a>, span: Span) -> ParseResult<Node> {
        let (targets, iterable) = self.with_expr(args, |parser| {
            let mut targets = vec![parser.expect_identifier()?];
            while parser.eat_punct(",") {
                targets.push(parser.expect_identifier()?);
            }
            parser.expect_keyword("in")?;
            Ok((targets, parser.parse_expression()?))
        })?;

        let (body, closing) = self.parse_until(&["else", "endfor"])?;
        self.expect_no_args(&closing)?;
        let else_body = if closing.name == "else" {
            let (else_body, end) = self.parse_until(&["endfor"])?;
            self.expect_no_args(&end)?;
            Some(else_body)
        } else {
            None
        };

        Ok(Node::For {
            targets,
            iterable,
            body,
            else_body,
            span,
        })
    }

    fn parse_block(&mut self, args: Marked<'a>, span: Span) -> ParseResult<Node> {
        let name = self.with_expr(args, ExprParser::expect_identifier)?;
        if !self.blocks.insert(name.clone()) {
            return Err(self.error(span, SyntaxErrorKind::DuplicateBlock { name }));
        }

        let (body, closing) = self.parse_until(&["endblock"])?;
        if !closing.args.text.is_empty() {
            let found = self.with_expr(closing.args, ExprParser::expect_identifier)?;
            if found != name {
                return Err(self.error(
                    closing.span,
                    SyntaxErrorKind::MismatchedEndblock {
                        expected: name,
                        found,
                    },
                ));
            }
        }

        Ok(Node::Block { name, body, span })
    }

    fn parse_extends(&mut self, args: Marked<'a>, span: Span) -> ParseResult<Node> {
        let invalid = |reason: &str| {
            self.error(
                span,
                SyntaxErrorKind::InvalidExtends {
                    reason: reason.to_owned(),
                },
            )
        };
        if self.depth > 0 {
            return Err(invalid("extends must be at the top level of a template"));
        }
        if self.extends_seen {
            return Err(invalid("a template can only extend one parent"));
        }
        if self.content_seen {
            return Err(invalid("extends must come before any other content"));
        }

        let parent = match self.parse_marked(args)? {
            Expr::Literal(Value::String(parent)) => parent.to_string(),
            _ => return Err(invalid("the parent name must be a string literal")),
        };
        self.extends_seen = true;
        Ok(Node::Extends { parent, span })
    }

    fn parse_include(&mut self, args: Marked<'a>, span: Span) -> ParseResult<Node> {
        let (name, with) = self.with_expr(args, |parser| {
            let name = parser.parse_expression()?;
            let with = if parser.eat_keyword("with") {
                Some(parser.parse_expression()?)
            } else {
                None
            };
            Ok((name, with))
        })?;
        Ok(Node::Include { name, with, span })
    }
}

fn describe(ends: &[&str]) -> String {
    if ends.is_empty() {
        return "a statement".to_owned();
    }
    ends.iter()
        .map(|end| format!("'{end}'"))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Parses template `source` into its statement tree. `template` names the
/// source in error messages.
pub(crate) fn parse(template: &str, source: &str, trim_tag_lines: bool) -> ParseResult<Vec<Node>> {
    let tokens = lexer::tokenize(template, source, trim_tag_lines)?;
    let mut parser = Parser::new(template, source, tokens);
    let (nodes, _) = parser.parse_body(&[])?;
    Ok(nodes)
}
