//! Tokens produced by the tokenizer and the cursor the compiler consumes them through.

use std::fmt;

/// Kind of a template token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Literal text copied to the output.
    String,
    /// `{{# ... #}}` comment, dropped by the compiler.
    Comment,
    /// The code of a `{{ ... }}` block, without its filters.
    Tag,
    /// One `|> ...` filter applied to the preceding tag expression.
    Filter,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::String => "string",
            TokenKind::Comment => "comment",
            TokenKind::Tag => "tag",
            TokenKind::Filter => "filter",
        };
        f.write_str(name)
    }
}

/// A single token with the byte offset where it starts in the template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    pub fn is_tag(&self) -> bool {
        self.kind == TokenKind::Tag
    }
}

/// Cursor over the tokens of one compile call.
///
/// Tag handlers receive the stream by `&mut` so they can consume the tokens of
/// a block body (up to the matching closing tag) before returning their node.
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    tokens: Vec<Token>,
    cursor: usize,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            cursor: 0,
        }
    }

    /// The next token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    /// Consume and return the next token.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(token)
    }

    /// Consume the next token only if `predicate` accepts it.
    pub fn next_if(&mut self, predicate: impl FnOnce(&Token) -> bool) -> Option<Token> {
        match self.peek() {
            Some(token) if predicate(token) => self.next(),
            _ => None,
        }
    }

    /// Consume tokens for as long as `predicate` accepts them.
    pub fn take_while(&mut self, mut predicate: impl FnMut(&Token) -> bool) -> Vec<Token> {
        let mut taken = Vec::new();
        while let Some(token) = self.next_if(&mut predicate) {
            taken.push(token);
        }
        taken
    }

    pub fn is_empty(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    /// Number of tokens not consumed yet.
    pub fn remaining(&self) -> usize {
        self.tokens.len().saturating_sub(self.cursor)
    }

    /// Position of the next token, or `None` once the stream is exhausted.
    pub fn position(&self) -> Option<usize> {
        self.peek().map(|token| token.position)
    }
}

impl From<Vec<Token>> for TokenStream {
    fn from(tokens: Vec<Token>) -> Self {
        Self::new(tokens)
    }
}
