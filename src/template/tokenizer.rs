//! Default tokenizer for `{{ ... }}` templates.
//!
//! The syntax it recognizes:
//!
//! - `{{ code }}` produces a [`TokenKind::Tag`] token, and each top-level
//!   `|> filter` inside it a [`TokenKind::Filter`] token.
//! - `{{# text #}}` produces a [`TokenKind::Comment`] token.
//! - `{{-` trims whitespace before the block and `-}}` after it.
//! - Everything else is [`TokenKind::String`] text.
//!
//! Quotes (`'`, `"`, `` ` ``) and brackets are tracked so `}}` or `|>` inside a
//! string literal or an object literal do not end the tag.

use super::token::{Token, TokenKind};

/// A tokenizer failure: what went wrong and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, TokenizeError> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut cursor = 0;
    let mut trim_next = false;

    while cursor < source.len() {
        let Some(offset) = source[cursor..].find("{{") else {
            push_text(&mut tokens, &source[cursor..], cursor, trim_next);
            break;
        };
        let start = cursor + offset;
        push_text(&mut tokens, &source[cursor..start], cursor, trim_next);
        trim_next = false;

        let after_open = start + 2;
        if source[after_open..].starts_with('#') {
            let Some(end) = source[after_open..].find("#}}") else {
                return Err(TokenizeError {
                    message: "Unclosed comment".to_string(),
                    position: start,
                });
            };
            let text = &source[after_open + 1..after_open + end];
            tokens.push(Token::new(TokenKind::Comment, text.trim(), start));
            cursor = after_open + end + 3;
            continue;
        }

        let mut body_start = after_open;
        if source[body_start..].starts_with('-') {
            body_start += 1;
            trim_previous(&mut tokens);
        }

        let Some(close) = find_tag_end(source, body_start) else {
            return Err(TokenizeError {
                message: "Unclosed tag".to_string(),
                position: start,
            });
        };

        let mut body_end = close;
        if source[body_start..body_end].ends_with('-') {
            body_end -= 1;
            trim_next = true;
        }

        push_tag(&mut tokens, source, body_start, body_end, start);
        cursor = close + 2;
    }

    Ok(tokens)
}

fn push_text(tokens: &mut Vec<Token>, text: &str, position: usize, trim_start: bool) {
    let text = if trim_start { text.trim_start() } else { text };
    if !text.is_empty() {
        tokens.push(Token::new(TokenKind::String, text, position));
    }
}

fn trim_previous(tokens: &mut Vec<Token>) {
    if let Some(last) = tokens.last_mut().filter(|t| t.kind == TokenKind::String) {
        let trimmed_len = last.text.trim_end().len();
        last.text.truncate(trimmed_len);
        if last.text.is_empty() {
            tokens.pop();
        }
    }
}

/// Push the tag token and its filter tokens for `source[start..end]`.
fn push_tag(tokens: &mut Vec<Token>, source: &str, start: usize, end: usize, position: usize) {
    let body = &source[start..end];
    let mut segments = split_filters(body).into_iter();

    let code = segments.next().map(|(_, text)| text).unwrap_or_default();
    tokens.push(Token::new(TokenKind::Tag, code.trim(), position));

    for (offset, text) in segments {
        tokens.push(Token::new(TokenKind::Filter, text.trim(), start + offset));
    }
}

/// Split a tag body at every top-level `|>`, returning `(offset, text)` pairs.
fn split_filters(body: &str) -> Vec<(usize, &str)> {
    let mut segments = Vec::new();
    let mut scanner = Scanner::default();
    let bytes = body.as_bytes();
    let mut segment_start = 0;
    let mut index = 0;

    while index < bytes.len() {
        if scanner.at_top_level() && bytes[index] == b'|' && bytes.get(index + 1) == Some(&b'>') {
            segments.push((segment_start, &body[segment_start..index]));
            index += 2;
            segment_start = index;
            continue;
        }
        scanner.feed(bytes[index]);
        index += 1;
    }
    segments.push((segment_start, &body[segment_start..]));
    segments
}

/// Byte index of the `}}` closing the tag whose body starts at `start`.
fn find_tag_end(source: &str, start: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut scanner = Scanner::default();
    let mut index = start;

    while index < bytes.len() {
        if scanner.at_top_level() && bytes[index] == b'}' && bytes.get(index + 1) == Some(&b'}') {
            return Some(index);
        }
        scanner.feed(bytes[index]);
        index += 1;
    }
    None
}

/// Tracks string literals and bracket nesting inside a tag body.
#[derive(Default)]
struct Scanner {
    quote: Option<u8>,
    escaped: bool,
    depth: usize,
}

impl Scanner {
    fn at_top_level(&self) -> bool {
        self.quote.is_none() && self.depth == 0
    }

    fn feed(&mut self, byte: u8) {
        if let Some(quote) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == quote {
                self.quote = None;
            }
            return;
        }

        match byte {
            b'"' | b'\'' | b'`' => self.quote = Some(byte),
            b'{' | b'[' | b'(' => self.depth += 1,
            b'}' | b']' | b')' => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
    }
}
