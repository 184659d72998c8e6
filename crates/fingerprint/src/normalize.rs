use regex::Regex;
use std::sync::OnceLock;

// String literals (possibly unterminated), identifiers, numbers, then any
// other single non-space character.
const TOKEN_PATTERN: &str = r#""(?:[^"\\]|\\.)*"?|'(?:[^'\\]|\\.)*'?|[A-Za-z_$][A-Za-z0-9_$]*|[0-9][A-Za-z0-9_.]*|\S"#;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TOKEN_PATTERN).unwrap_or_else(|err| panic!("token regex: {err}")))
}

/// Normalize raw source text.
///
/// With `strip_comments`, `//` line comments and `/* */` block comments are
/// replaced by a single space; comment markers inside string or character
/// literals are left alone. Every whitespace run is then collapsed to one
/// space and the result is trimmed.
#[must_use]
pub fn normalize(raw: &str, strip_comments: bool) -> String {
    let stripped;
    let text = if strip_comments {
        stripped = strip_comment_syntax(raw);
        stripped.as_str()
    } else {
        raw
    };

    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Split normalized text into tokens.
#[must_use]
pub fn tokenize(normalized: &str) -> Vec<&str> {
    token_regex()
        .find_iter(normalized)
        .map(|m| m.as_str())
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    LineComment,
    BlockComment,
    Literal(char),
    LiteralEscape(char),
}

fn strip_comment_syntax(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut state = ScanState::Code;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        state = match state {
            ScanState::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push(' ');
                    ScanState::LineComment
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push(' ');
                    ScanState::BlockComment
                }
                '"' | '\'' => {
                    out.push(c);
                    ScanState::Literal(c)
                }
                _ => {
                    out.push(c);
                    ScanState::Code
                }
            },
            ScanState::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    ScanState::Code
                } else {
                    ScanState::LineComment
                }
            }
            ScanState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    ScanState::Code
                } else {
                    ScanState::BlockComment
                }
            }
            ScanState::Literal(quote) => {
                out.push(c);
                if c == '\\' {
                    ScanState::LiteralEscape(quote)
                } else if c == quote || c == '\n' {
                    ScanState::Code
                } else {
                    ScanState::Literal(quote)
                }
            }
            ScanState::LiteralEscape(quote) => {
                out.push(c);
                ScanState::Literal(quote)
            }
        };
    }

    out
}
