//! Tokenizer and recursive-descent parser for the embedded expression
//! language.
//!
//! Precedence, loosest first: `lambda`, `or`, `and`, `not`, comparisons
//! (including `in` and `not in`), `+`/`-`, `*`/`/`/`//`/`%`, unary `-`/`+`,
//! postfix `.attr`/`[key]`/`(args)`, atoms.

use std::sync::Arc;

use crate::{
    ast::{BinOp, Expr, UnaryOp},
    value::Value,
};

/// Maximum nesting of sub-expressions before parsing gives up. Every operator
/// or postfix step in a chain counts as one level, since it nests the tree
/// built so far one deeper.
const MAX_DEPTH: usize = 128;

static END: Lexed<'static> = Lexed {
    tok: Tok::End,
    offset: 0,
};

/// Operators and punctuation, longest first so `//` wins over `/`.
const PUNCTUATION: [&str; 22] = [
    "//", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "<", ">", "(", ")", "[", "]", "{",
    "}", ",", ":", ".", "=",
];

/// A parse failure at a byte offset of the expression source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExprError {
    pub offset: usize,
    pub message: String,
}

type ExprResult<T> = Result<T, ExprError>;

#[derive(Debug, Clone, PartialEq)]
enum Tok<'a> {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(&'a str),
    Punct(&'static str),
    End,
}

impl Tok<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Int(i) => format!("integer {i}"),
            Self::Float(f) => format!("float {f}"),
            Self::Str(s) => format!("string {}", Value::from(s.as_str()).repr()),
            Self::Ident(name) => format!("'{name}'"),
            Self::Punct(p) => format!("'{p}'"),
            Self::End => "end of expression".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Lexed<'a> {
    tok: Tok<'a>,
    offset: usize,
}

fn error<T, M: Into<String>>(offset: usize, message: M) -> ExprResult<T> {
    Err(ExprError {
        offset,
        message: message.into(),
    })
}

fn lex(source: &str) -> ExprResult<Vec<Lexed<'_>>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let rest = source.get(offset..).unwrap_or_default();

        if c.is_ascii_digit() {
            let (tok, len) = lex_number(rest).map_err(|message| ExprError { offset, message })?;
            tokens.push(Lexed { tok, offset });
            while chars.peek().is_some_and(|&(o, _)| o < offset + len) {
                chars.next();
            }
        } else if c == '\'' || c == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, ch)) = chars.next() {
                match ch {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, 'r')) => value.push('\r'),
                        Some((_, '0')) => value.push('\0'),
                        Some((_, escaped @ ('\\' | '\'' | '"'))) => value.push(escaped),
                        Some((_, other)) => {
                            value.push('\\');
                            value.push(other);
                        }
                        None => break,
                    },
                    ch if ch == c => {
                        closed = true;
                        break;
                    }
                    ch => value.push(ch),
                }
            }
            if !closed {
                return error(offset, "unterminated string literal");
            }
            tokens.push(Lexed {
                tok: Tok::Str(value),
                offset,
            });
        } else if c.is_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            let ident = rest.get(..len).unwrap_or_default();
            tokens.push(Lexed {
                tok: Tok::Ident(ident),
                offset,
            });
            while chars.peek().is_some_and(|&(o, _)| o < offset + len) {
                chars.next();
            }
        } else if let Some(&punct) = PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            tokens.push(Lexed {
                tok: Tok::Punct(punct),
                offset,
            });
            for _ in 0..punct.len() {
                chars.next();
            }
        } else {
            return error(offset, format!("unexpected character '{c}'"));
        }
    }

    tokens.push(Lexed {
        tok: Tok::End,
        offset: source.trim_end().len(),
    });
    Ok(tokens)
}

/// Lexes an integer or float literal at the start of `rest`, returning the
/// token and its byte length.
fn lex_number(rest: &str) -> Result<(Tok<'static>, usize), String> {
    let bytes = rest.as_bytes();
    let digits = |from: usize| {
        bytes
            .get(from..)
            .map_or(0, |tail| tail.iter().take_while(|b| b.is_ascii_digit()).count())
    };

    let mut len = digits(0);
    let mut is_float = false;
    if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
        is_float = true;
        len += 1 + digits(len + 1);
    }
    if matches!(bytes.get(len), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(len + 1), Some(b'+' | b'-')));
        let exponent = digits(len + 1 + sign);
        if exponent > 0 {
            is_float = true;
            len += 1 + sign + exponent;
        }
    }

    let text = rest.get(..len).unwrap_or_default();
    if is_float {
        text.parse::<f64>()
            .map(|f| (Tok::Float(f), len))
            .map_err(|_| format!("invalid float literal '{text}'"))
    } else {
        text.parse::<i64>()
            .map(|i| (Tok::Int(i), len))
            .map_err(|_| format!("integer literal '{text}' is too large"))
    }
}

const KEYWORDS: [&str; 11] = [
    "and", "or", "not", "in", "lambda", "True", "False", "None", "true", "false", "none",
];

/// Parser over one expression source. Tag parsers drive it piecewise via
/// [`ExprParser::expect_identifier`] and [`ExprParser::eat_keyword`].
pub(crate) struct ExprParser<'a> {
    tokens: Vec<Lexed<'a>>,
    pos: usize,
    depth: usize,
}

impl<'a> ExprParser<'a> {
    pub(crate) fn new(source: &'a str) -> ExprResult<Self> {
        Ok(Self {
            tokens: lex(source)?,
            pos: 0,
            depth: 0,
        })
    }

    fn current(&self) -> &Lexed<'a> {
        // `lex` always terminates the stream with `End`, and `bump` never
        // moves past it.
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .unwrap_or(&END)
    }

    fn peek(&self) -> &Tok<'a> {
        &self.current().tok
    }

    fn peek_nth(&self, n: usize) -> Option<&Tok<'a>> {
        self.tokens.get(self.pos + n).map(|lexed| &lexed.tok)
    }

    fn offset(&self) -> usize {
        self.current().offset
    }

    fn bump(&mut self) -> Tok<'a> {
        let tok = self.peek().clone();
        if tok != Tok::End {
            self.pos += 1;
        }
        tok
    }

    fn unexpected<T>(&self, expected: &str) -> ExprResult<T> {
        error(
            self.offset(),
            format!("expected {expected}, found {}", self.peek().describe()),
        )
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Tok::Punct(p) if *p == punct)
    }

    pub(crate) fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> ExprResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            self.unexpected(&format!("'{punct}'"))
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Tok::Ident(name) if *name == keyword)
    }

    pub(crate) fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_keyword(&mut self, keyword: &str) -> ExprResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            self.unexpected(&format!("'{keyword}'"))
        }
    }

    /// Consumes a plain (non-keyword) identifier.
    pub(crate) fn expect_identifier(&mut self) -> ExprResult<String> {
        match self.peek() {
            Tok::Ident(name) if !KEYWORDS.contains(name) => {
                let name = (*name).to_owned();
                self.bump();
                Ok(name)
            }
            _ => self.unexpected("identifier"),
        }
    }

    pub(crate) fn at_end(&self) -> bool {
        *self.peek() == Tok::End
    }

    pub(crate) fn expect_end(&self) -> ExprResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            self.unexpected("end of expression")
        }
    }

    pub(crate) fn parse_expression(&mut self) -> ExprResult<Expr> {
        self.deepen()?;
        let expr = if self.is_keyword("lambda") {
            self.parse_lambda()
        } else {
            self.parse_or_expression()
        };
        self.depth -= 1;
        expr
    }

    fn parse_lambda(&mut self) -> ExprResult<Expr> {
        self.expect_keyword("lambda")?;
        let mut params = Vec::new();
        if !self.is_punct(":") {
            loop {
                let param = self.expect_identifier()?;
                if params.contains(&param) {
                    return error(
                        self.offset(),
                        format!("duplicate argument '{param}' in lambda"),
                    );
                }
                params.push(param);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(":")?;
        let body = self.parse_expression()?;
        Ok(Expr::Lambda {
            params,
            body: Arc::new(body),
        })
    }

    // Handles `or`
    fn parse_or_expression(&mut self) -> ExprResult<Expr> {
        let base = self.depth;
        let mut left = self.parse_and_expression()?;
        while self.eat_keyword("or") {
            self.deepen()?;
            let right = self.parse_and_expression()?;
            left = binary(BinOp::Or, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    // Handles `and`
    fn parse_and_expression(&mut self) -> ExprResult<Expr> {
        let base = self.depth;
        let mut left = self.parse_not_expression()?;
        while self.eat_keyword("and") {
            self.deepen()?;
            let right = self.parse_not_expression()?;
            left = binary(BinOp::And, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    // Handles `not`
    fn parse_not_expression(&mut self) -> ExprResult<Expr> {
        if self.is_keyword("not") && !matches!(self.peek_nth(1), Some(Tok::Ident("in"))) {
            self.bump();
            let operand = self.nested(Self::parse_not_expression)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn comparison_operator(&mut self) -> Option<BinOp> {
        let op = match self.peek() {
            Tok::Punct("==") => BinOp::Eq,
            Tok::Punct("!=") => BinOp::Ne,
            Tok::Punct("<") => BinOp::Lt,
            Tok::Punct("<=") => BinOp::Le,
            Tok::Punct(">") => BinOp::Gt,
            Tok::Punct(">=") => BinOp::Ge,
            Tok::Ident("in") => BinOp::In,
            Tok::Ident("not") if matches!(self.peek_nth(1), Some(Tok::Ident("in"))) => {
                self.bump();
                BinOp::NotIn
            }
            _ => return None,
        };
        self.bump();
        Some(op)
    }

    /// Comparisons chain: `a < b < c` means `a < b and b < c`.
    fn parse_comparison(&mut self) -> ExprResult<Expr> {
        let base = self.depth;
        let first = self.parse_additive()?;
        let mut chain: Option<Expr> = None;
        let mut left = first.clone();
        let mut result = first;

        while let Some(op) = self.comparison_operator() {
            self.deepen()?;
            let right = self.parse_additive()?;
            let comparison = binary(op, left, right.clone());
            chain = Some(match chain {
                None => comparison,
                Some(previous) => binary(BinOp::And, previous, comparison),
            });
            left = right;
        }

        if let Some(chain) = chain {
            result = chain;
        }
        self.depth = base;
        Ok(result)
    }

    fn parse_additive(&mut self) -> ExprResult<Expr> {
        let base = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Punct("+") => BinOp::Add,
                Tok::Punct("-") => BinOp::Sub,
                _ => break,
            };
            self.bump();
            self.deepen()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ExprResult<Expr> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Punct("*") => BinOp::Mul,
                Tok::Punct("/") => BinOp::Div,
                Tok::Punct("//") => BinOp::FloorDiv,
                Tok::Punct("%") => BinOp::Mod,
                _ => break,
            };
            self.bump();
            self.deepen()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> ExprResult<Expr> {
        let op = match self.peek() {
            Tok::Punct("-") => UnaryOp::Neg,
            Tok::Punct("+") => UnaryOp::Pos,
            _ => return self.parse_postfix(),
        };
        self.bump();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> ExprResult<Expr> {
        let base = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                self.deepen()?;
                let Tok::Ident(name) = self.peek().clone() else {
                    return self.unexpected("attribute name");
                };
                self.bump();
                expr = Expr::Attribute {
                    target: Box::new(expr),
                    name: name.to_owned(),
                };
            } else if self.eat_punct("[") {
                self.deepen()?;
                let key = self.parse_expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    key: Box::new(key),
                };
            } else if self.eat_punct("(") {
                self.deepen()?;
                let (args, kwargs) = self.parse_call_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    kwargs,
                };
            } else {
                self.depth = base;
                return Ok(expr);
            }
        }
    }

    /// Parses `arg, name=value, ...)` after the opening parenthesis.
    fn parse_call_arguments(&mut self) -> ExprResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.eat_punct(")") {
            let is_keyword_argument = matches!(self.peek(), Tok::Ident(_))
                && matches!(self.peek_nth(1), Some(Tok::Punct("=")));
            if is_keyword_argument {
                let offset = self.offset();
                let name = self.expect_identifier()?;
                self.expect_punct("=")?;
                if kwargs.iter().any(|(existing, _)| *existing == name) {
                    return error(offset, format!("keyword argument repeated: '{name}'"));
                }
                kwargs.push((name, self.parse_expression()?));
            } else {
                if !kwargs.is_empty() {
                    return error(
                        self.offset(),
                        "positional argument follows keyword argument",
                    );
                }
                args.push(self.parse_expression()?);
            }
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn parse_primary(&mut self) -> ExprResult<Expr> {
        let offset = self.offset();
        match self.bump() {
            Tok::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Tok::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Tok::Str(s) => Ok(Expr::Literal(Value::from(s))),
            Tok::Ident("True" | "true") => Ok(Expr::Literal(Value::Bool(true))),
            Tok::Ident("False" | "false") => Ok(Expr::Literal(Value::Bool(false))),
            Tok::Ident("None" | "none") => Ok(Expr::Literal(Value::None)),
            Tok::Ident(name) if !KEYWORDS.contains(&name) => Ok(Expr::Name(name.to_owned())),
            Tok::Punct("(") => self.nested(Self::parse_parenthesized),
            Tok::Punct("[") => {
                let items = self.nested(|parser| parser.parse_sequence("]"))?;
                Ok(Expr::List(items))
            }
            Tok::Punct("{") => self.nested(Self::parse_dict),
            tok => error(
                offset,
                format!("expected an expression, found {}", tok.describe()),
            ),
        }
    }

    /// `(expr)` groups, `()` and `(a, b)` build lists.
    fn parse_parenthesized(&mut self) -> ExprResult<Expr> {
        if self.eat_punct(")") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_expression()?;
        if self.eat_punct(")") {
            return Ok(first);
        }
        self.expect_punct(",")?;
        let mut items = vec![first];
        items.extend(self.parse_sequence(")")?);
        Ok(Expr::List(items))
    }

    /// Comma separated expressions up to `close`, trailing comma allowed.
    fn parse_sequence(&mut self, close: &str) -> ExprResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat_punct(close) {
            items.push(self.parse_expression()?);
            if !self.eat_punct(",") {
                self.expect_punct(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn parse_dict(&mut self) -> ExprResult<Expr> {
        let mut pairs = Vec::new();
        while !self.eat_punct("}") {
            let key = self.parse_expression()?;
            self.expect_punct(":")?;
            let value = self.parse_expression()?;
            pairs.push((key, value));
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Dict(pairs))
    }

    /// Enters one more nesting level. Callers reset `depth` themselves.
    fn deepen(&mut self) -> ExprResult<()> {
        if self.depth >= MAX_DEPTH {
            return error(self.offset(), "expression is nested too deeply");
        }
        self.depth += 1;
        Ok(())
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ExprResult<T>) -> ExprResult<T> {
        self.deepen()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Parses a complete expression, rejecting trailing input.
pub(crate) fn parse_expression(source: &str) -> ExprResult<Expr> {
    let mut parser = ExprParser::new(source)?;
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(expr)
}
