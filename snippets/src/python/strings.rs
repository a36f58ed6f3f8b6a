//! A small lexer that finds Python string literals and comments.
//!
//! Source rewrites only ever touch the inside of string literals, and the
//! synthesizer must know which lines continue a multi-line string so it can
//! leave them unindented. Neither needs a full token stream.

use std::ops::Range;

/// One string literal as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLiteral {
    /// Byte offset of the first prefix character (or the opening quote).
    pub start: usize,
    /// Prefix letters as written (`f`, `rb`, `U`...), possibly empty.
    pub prefix: String,
    pub quote: char,
    pub triple: bool,
    /// Byte range of the text between the quotes.
    pub body: Range<usize>,
    /// Byte offset just past the closing quote (or end of input).
    pub end: usize,
    pub terminated: bool,
}

impl StringLiteral {
    fn has_prefix(&self, c: char) -> bool {
        self.prefix.chars().any(|p| p.eq_ignore_ascii_case(&c))
    }

    pub fn is_fstring(&self) -> bool {
        self.has_prefix('f')
    }

    pub fn is_raw(&self) -> bool {
        self.has_prefix('r')
    }

    pub fn is_bytes(&self) -> bool {
        self.has_prefix('b')
    }

    pub fn body<'a>(&self, code: &'a str) -> &'a str {
        &code[self.body.clone()]
    }

    pub fn delimiter(&self) -> String {
        let n = if self.triple { 3 } else { 1 };
        std::iter::repeat_n(self.quote, n).collect()
    }
}

const PREFIXES: &[&str] = &[
    "rb", "br", "fr", "rf", "r", "u", "b", "f",
];

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Every string literal in `code`, in source order. Comments are skipped.
pub fn string_literals(code: &str) -> Vec<StringLiteral> {
    let bytes = code.as_bytes();
    let mut literals = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'#' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        if b == b'"' || b == b'\'' {
            let lit = lex_string(code, i, i);
            i = lit.end;
            literals.push(lit);
            continue;
        }

        if is_ident_byte(b) {
            let word_start = i;
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            let word = &code[word_start..i];
            let at_quote = i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'');
            if at_quote && PREFIXES.iter().any(|p| p.eq_ignore_ascii_case(word)) {
                let lit = lex_string(code, word_start, i);
                i = lit.end;
                literals.push(lit);
            }
            continue;
        }

        i += 1;
    }

    literals
}

fn lex_string(code: &str, start: usize, quote_at: usize) -> StringLiteral {
    let bytes = code.as_bytes();
    let quote = bytes[quote_at];
    let triple = bytes.len() >= quote_at + 3
        && bytes[quote_at + 1] == quote
        && bytes[quote_at + 2] == quote;
    let open_len = if triple { 3 } else { 1 };
    let body_start = quote_at + open_len;

    let mut i = body_start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'\n' if !triple => break,
            c if c == quote => {
                if !triple {
                    return literal(code, start, quote_at, quote, false, body_start..i, i + 1, true);
                }
                if bytes.len() >= i + 3 && bytes[i + 1] == quote && bytes[i + 2] == quote {
                    return literal(code, start, quote_at, quote, true, body_start..i, i + 3, true);
                }
            }
            _ => {}
        }
        i += 1;
    }

    let end = i.min(bytes.len());
    literal(code, start, quote_at, quote, triple, body_start..end, end, false)
}

#[allow(clippy::too_many_arguments)]
fn literal(
    code: &str,
    start: usize,
    quote_at: usize,
    quote: u8,
    triple: bool,
    body: Range<usize>,
    end: usize,
    terminated: bool,
) -> StringLiteral {
    StringLiteral {
        start,
        prefix: code[start..quote_at].to_string(),
        quote: quote as char,
        triple,
        body,
        end,
        terminated,
    }
}

/// For each line of `code`, whether it begins inside a string literal that
/// opened on an earlier line.
pub fn continuation_lines(code: &str) -> Vec<bool> {
    let literals = string_literals(code);
    let mut flags = Vec::new();
    let mut line_start = 0;
    for line in code.split('\n') {
        let inside = literals
            .iter()
            .any(|lit| lit.start < line_start && line_start < lit.end);
        flags.push(inside);
        line_start += line.len() + 1;
    }
    flags
}

/// Strip a trailing `#` comment from one line, respecting string literals
/// that start and end on it.
pub fn strip_comment(line: &str) -> &str {
    let mut search_from = 0;
    for lit in string_literals(line) {
        if let Some(hash) = line[search_from..lit.start].find('#') {
            return line[..search_from + hash].trim_end();
        }
        search_from = lit.end.min(line.len());
    }
    match line[search_from..].find('#') {
        Some(hash) => line[..search_from + hash].trim_end(),
        None => line.trim_end(),
    }
}
