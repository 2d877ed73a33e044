use std::borrow::Cow;

use crate::{
    ast::Span,
    error::{SyntaxError, SyntaxErrorKind},
};

const EXPR_OPEN: &str = "{{";
const EXPR_CLOSE: &str = "}}";
const TAG_OPEN: &str = "{%";
const TAG_CLOSE: &str = "%}";

type LexResult<T> = Result<T, SyntaxError>;

/// Raw marker content together with the position of its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Marked<'a> {
    pub text: &'a str,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    /// Literal text. Borrowed unless an escape forced a copy.
    Text(Cow<'a, str>),
    Expr(Marked<'a>),
    Tag { name: &'a str, args: Marked<'a> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub segment: Segment<'a>,
    /// Position of the opening delimiter (or of the first text byte).
    pub span: Span,
}

struct Lexer<'a> {
    template: &'a str,
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    trim_tag_lines: bool,
    tokens: Vec<Token<'a>>,
}

impl<'a> Lexer<'a> {
    const fn new(template: &'a str, input: &'a str, trim_tag_lines: bool) -> Self {
        Lexer {
            template,
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            trim_tag_lines,
            tokens: Vec::new(),
        }
    }

    #[inline]
    const fn span(&self) -> Span {
        Span::new(self.line, self.pos - self.line_start_pos + 1)
    }

    fn make_error(&self, span: Span, kind: SyntaxErrorKind) -> SyntaxError {
        SyntaxError::new(self.template, span, kind)
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.pos..).and_then(|rest| rest.chars().next())
    }

    /// Advances the position by one character, tracking line starts.
    #[inline]
    fn advance_by_char(&mut self, current_char: char) {
        let char_len = current_char.len_utf8();
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances by `len` bytes of input known to contain no newline.
    #[inline]
    const fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos += len;
    }

    const fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self, s: &str) -> bool {
        self.input
            .get(self.pos..)
            .is_some_and(|rest| rest.starts_with(s))
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        self.input.get(start..end).unwrap_or_default()
    }

    fn run(mut self) -> LexResult<Vec<Token<'a>>> {
        while !self.eof() {
            if self.peek(EXPR_OPEN) {
                let span = self.span();
                self.advance_bytes_no_newline(EXPR_OPEN.len());
                let marked = self.scan_marker(span, EXPR_CLOSE)?;
                self.tokens.push(Token {
                    segment: Segment::Expr(marked),
                    span,
                });
            } else if self.peek(TAG_OPEN) {
                self.lex_tag()?;
            } else {
                self.lex_text();
            }
        }
        Ok(self.tokens)
    }

    /// Consumes literal text up to the next unescaped marker.
    fn lex_text(&mut self) {
        let span = self.span();
        let mut text: Cow<'a, str> = Cow::Borrowed("");
        let mut start = self.pos;

        while let Some(current_char) = self.current_char() {
            // `\{{` and `\{%` produce the delimiter itself
            if self.peek("\\{{") || self.peek("\\{%") {
                append(&mut text, self.slice(start, self.pos));
                self.advance_bytes_no_newline(1);
                start = self.pos;
                self.advance_bytes_no_newline(2);
                continue;
            }
            if self.peek(EXPR_OPEN) || self.peek(TAG_OPEN) {
                break;
            }
            self.advance_by_char(current_char);
        }
        append(&mut text, self.slice(start, self.pos));

        if !text.is_empty() {
            self.tokens.push(Token {
                segment: Segment::Text(text),
                span,
            });
        }
    }

    fn lex_tag(&mut self) -> LexResult<()> {
        let span = self.span();
        let line_start = self.line_start_pos;
        let tag_start = self.pos;
        self.advance_bytes_no_newline(TAG_OPEN.len());
        let content = self.scan_marker(span, TAG_CLOSE)?;

        let leading = content.text.len() - content.text.trim_start().len();
        let body = content.text.trim();
        let name_len = body
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(body.len());
        if name_len == 0 {
            return Err(self.make_error(span, SyntaxErrorKind::MissingTagName));
        }
        let (name, rest) = body.split_at(name_len);
        let args_offset = leading + name_len + (rest.len() - rest.trim_start().len());
        let args = Marked {
            text: rest.trim(),
            span: content
                .span
                .advance(content.text.get(..args_offset).unwrap_or_default()),
        };

        if self.trim_tag_lines {
            self.trim_tag_line(line_start, tag_start);
        }
        self.tokens.push(Token {
            segment: Segment::Tag { name, args },
            span,
        });
        Ok(())
    }

    /// Drops the indentation before and the line break after a tag that is
    /// alone on its line.
    fn trim_tag_line(&mut self, line_start: usize, tag_start: usize) {
        let prefix = self.slice(line_start, tag_start);
        if !prefix.chars().all(|c| c == ' ' || c == '\t') {
            return;
        }

        let rest = self.input.get(self.pos..).unwrap_or_default();
        let suffix_len = rest
            .find(|c: char| !(c == ' ' || c == '\t' || c == '\r'))
            .unwrap_or(rest.len());
        let after = rest.get(suffix_len..).unwrap_or_default();
        if !(after.is_empty() || after.starts_with('\n')) {
            return;
        }

        let mut emptied = false;
        if !prefix.is_empty() {
            if let Some(Token {
                segment: Segment::Text(text),
                ..
            }) = self.tokens.last_mut()
            {
                let keep = text.len().saturating_sub(prefix.len());
                match text {
                    Cow::Borrowed(s) => {
                        let current: &'a str = *s;
                        *s = current.get(..keep).unwrap_or_default();
                    }
                    Cow::Owned(s) => s.truncate(keep),
                }
                emptied = text.is_empty();
            }
        }
        if emptied {
            self.tokens.pop();
        }

        self.advance_bytes_no_newline(suffix_len);
        if after.starts_with('\n') {
            self.advance_by_char('\n');
        }
    }

    /// Scans marker content up to `close`, skipping over string literals and
    /// nested brackets so a `}}` inside them does not end the marker.
    fn scan_marker(&mut self, open_span: Span, close: &str) -> LexResult<Marked<'a>> {
        let span = self.span();
        let start = self.pos;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;

        while let Some(current_char) = self.current_char() {
            match quote {
                Some(q) => {
                    if current_char == '\\' {
                        self.advance_by_char(current_char);
                        if let Some(escaped) = self.current_char() {
                            self.advance_by_char(escaped);
                        }
                        continue;
                    }
                    if current_char == q {
                        quote = None;
                    }
                }
                None => {
                    if depth == 0 && self.peek(close) {
                        let text = self.slice(start, self.pos);
                        self.advance_bytes_no_newline(close.len());
                        return Ok(Marked { text, span });
                    }
                    match current_char {
                        '\'' | '"' => quote = Some(current_char),
                        '(' | '[' | '{' => depth += 1,
                        ')' | ']' | '}' => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                }
            }
            self.advance_by_char(current_char);
        }

        Err(self.make_error(
            open_span,
            SyntaxErrorKind::UnterminatedMarker {
                delimiter: close.to_owned(),
            },
        ))
    }
}

fn append<'a>(text: &mut Cow<'a, str>, piece: &'a str) {
    if text.is_empty() {
        *text = Cow::Borrowed(piece);
    } else if !piece.is_empty() {
        text.to_mut().push_str(piece);
    }
}

/// Splits template source into literal text, `{{ }}` and `{% %}` segments.
pub(crate) fn tokenize<'a>(
    template: &'a str,
    input: &'a str,
    trim_tag_lines: bool,
) -> LexResult<Vec<Token<'a>>> {
    Lexer::new(template, input, trim_tag_lines).run()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn segments(input: &str) -> Vec<Segment<'_>> {
        tokenize("test", input, true)
            .unwrap()
            .into_iter()
            .map(|token| token.segment)
            .collect()
    }

    fn text(s: &str) -> Segment<'_> {
        Segment::Text(Cow::Borrowed(s))
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert_eq!(segments(""), vec![]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_plain_text_is_untouched() {
        let input = "  hello\n\t world  \n\n";
        assert_eq!(segments(input), vec![text(input)]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_expression_marker() {
        let tokens = tokenize("test", "Hello, {{ name }}!", true).unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].segment, text("Hello, "));
        assert_eq!(
            tokens[1].segment,
            Segment::Expr(Marked {
                text: " name ",
                span: Span::new(1, 10),
            })
        );
        assert_eq!(tokens[1].span, Span::new(1, 8));
        assert_eq!(tokens[2].segment, text("!"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tag_name_and_args() {
        let tokens = tokenize("test", "{%  for i in l %}", true).unwrap();
        assert_eq!(
            tokens[0].segment,
            Segment::Tag {
                name: "for",
                args: Marked {
                    text: "i in l",
                    span: Span::new(1, 9),
                },
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tag_without_args() {
        assert_eq!(
            segments("{%endif%}"),
            vec![Segment::Tag {
                name: "endif",
                args: Marked {
                    text: "",
                    span: Span::new(1, 8),
                },
            }]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_close_inside_string_or_dict() {
        let tokens = segments("{{ '}}' }}{{ {'a': {'b': 1}} }}");
        assert!(matches!(tokens[0], Segment::Expr(Marked { text: " '}}' ", .. })));
        assert!(matches!(
            tokens[1],
            Segment::Expr(Marked {
                text: " {'a': {'b': 1}} ",
                ..
            })
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escaped_delimiters() {
        assert_eq!(
            segments(r"a \{{ b }} \{% c"),
            vec![Segment::Text(Cow::Owned("a {{ b }} {% c".to_owned()))]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unterminated_expression() {
        let err = tokenize("test", "ab\n  {{ name", true).unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert_eq!(
            err.kind,
            SyntaxErrorKind::UnterminatedMarker {
                delimiter: "}}".to_owned()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unterminated_tag() {
        let err = tokenize("test", "{% if x }}", true).unwrap_err();
        assert_eq!(
            err.kind,
            SyntaxErrorKind::UnterminatedMarker {
                delimiter: "%}".to_owned()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_tag_name() {
        let err = tokenize("test", "{%   %}", true).unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::MissingTagName);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tag_only_line_is_trimmed() {
        let input = "a\n    {% if x %}  \n    b\n{% endif %}\nc";
        let tokens = segments(input);
        assert_eq!(tokens[0], text("a\n"));
        assert!(matches!(tokens[1], Segment::Tag { name: "if", .. }));
        assert_eq!(tokens[2], text("    b\n"));
        assert!(matches!(tokens[3], Segment::Tag { name: "endif", .. }));
        assert_eq!(tokens[4], text("c"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_trimming_can_be_disabled() {
        let input = "a\n  {% if x %}\nb";
        let tokens: Vec<_> = tokenize("test", input, false)
            .unwrap()
            .into_iter()
            .map(|token| token.segment)
            .collect();
        assert_eq!(tokens[0], text("a\n  "));
        assert_eq!(tokens[2], text("\nb"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_shared_lines_are_not_trimmed() {
        let tokens = segments("  {% if x %}y{% endif %}\n");
        assert_eq!(tokens[0], text("  "));
        assert_eq!(tokens[2], text("y"));
        assert_eq!(tokens[4], text("\n"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_line_tracking_across_markers() {
        let tokens = tokenize("test", "one\ntwo {{ x\n}} three\n{% y %}", true).unwrap();
        assert_eq!(tokens[1].span, Span::new(2, 5));
        assert_eq!(tokens[3].span, Span::new(4, 1));
    }
}
