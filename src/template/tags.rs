//! Tag handlers and the built-in tag library.
//!
//! A [`TagHandler`] is offered the body of every `{{ ... }}` tag in
//! registration order. The first handler returning `Some(node)` claims the
//! tag; block tags consume their body from the token stream (through
//! [`Environment::compile_tokens`]) together with the matching closing tag.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::environment::Environment;
use super::error::TemplateError;
use super::expr::{parse_expression, parse_sequence};
use super::ir::{Expr, Node};
use super::token::{TokenKind, TokenStream};

/// Compiles the tags it recognizes into IR nodes.
pub trait TagHandler: Send + Sync {
    /// Return `Ok(None)` when `code` is not a tag this handler understands.
    fn compile(
        &self,
        env: &Environment,
        code: &str,
        position: usize,
        tokens: &mut TokenStream,
    ) -> Result<Option<Node>, TemplateError>;
}

impl<F> TagHandler for F
where
    F: Fn(&Environment, &str, usize, &mut TokenStream) -> Result<Option<Node>, TemplateError>
        + Send
        + Sync,
{
    fn compile(
        &self,
        env: &Environment,
        code: &str,
        position: usize,
        tokens: &mut TokenStream,
    ) -> Result<Option<Node>, TemplateError> {
        self(env, code, position, tokens)
    }
}

/// The tags every environment starts with, in the order they are offered.
pub(crate) fn builtin_tags() -> Vec<Arc<dyn TagHandler>> {
    vec![
        Arc::new(if_tag) as Arc<dyn TagHandler>,
        Arc::new(for_tag),
        Arc::new(set_tag),
        Arc::new(include_tag),
        Arc::new(layout_tag),
    ]
}

/// Returns the rest of `code` when it starts with the word `keyword`.
pub fn strip_keyword<'c>(code: &'c str, keyword: &str) -> Option<&'c str> {
    let rest = code.strip_prefix(keyword)?;
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Consume the closing tag `close` or fail with an unclosed-tag error.
fn expect_close(
    tokens: &mut TokenStream,
    tag: &str,
    close: &str,
    position: usize,
) -> Result<(), TemplateError> {
    tokens
        .next_if(|token| token.is_tag() && token.text == close)
        .map(|_| ())
        .ok_or_else(|| TemplateError::UnclosedTag {
            tag: tag.to_string(),
            expected: close.to_string(),
            position,
        })
}

/// `{{ if cond }} ... {{ else if cond }} ... {{ else }} ... {{ /if }}`
fn if_tag(
    env: &Environment,
    code: &str,
    position: usize,
    tokens: &mut TokenStream,
) -> Result<Option<Node>, TemplateError> {
    let Some(condition) = strip_keyword(code, "if") else {
        return Ok(None);
    };
    if condition.is_empty() {
        return Err(TemplateError::InvalidTag {
            tag: "if".to_string(),
            message: "missing condition".to_string(),
            position,
        });
    }

    let test = parse_expression(condition, position)?;
    let body = env.compile_tokens(tokens, &["else", "/if"])?;
    let mut branches = vec![(test, body)];

    loop {
        let Some(token) = tokens.next() else {
            return Err(TemplateError::UnclosedTag {
                tag: "if".to_string(),
                expected: "/if".to_string(),
                position,
            });
        };
        if token.text == "/if" {
            return Ok(Some(Node::If {
                branches,
                otherwise: Vec::new(),
            }));
        }

        let rest = strip_keyword(&token.text, "else").unwrap_or_default();
        if rest.is_empty() {
            let otherwise = env.compile_tokens(tokens, &["/if"])?;
            expect_close(tokens, "if", "/if", position)?;
            return Ok(Some(Node::If {
                branches,
                otherwise,
            }));
        }

        let Some(condition) = strip_keyword(rest, "if").filter(|c| !c.is_empty()) else {
            return Err(TemplateError::InvalidTag {
                tag: "else".to_string(),
                message: format!("expected 'else' or 'else if <condition>', found '{}'", token.text),
                position: token.position,
            });
        };
        let test = parse_expression(condition, token.position)?;
        let body = env.compile_tokens(tokens, &["else", "/if"])?;
        branches.push((test, body));
    }
}

static FOR_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)^(?:await\s+)?(?:([A-Za-z_$][\w$]*)\s*,\s*)?([A-Za-z_$][\w$]*)\s+of\s+(.+)$").ok()
});

/// `{{ for [await] [key,] value of iterable }} ... {{ /for }}`
fn for_tag(
    env: &Environment,
    code: &str,
    position: usize,
    tokens: &mut TokenStream,
) -> Result<Option<Node>, TemplateError> {
    let Some(rest) = strip_keyword(code, "for") else {
        return Ok(None);
    };
    let invalid = || TemplateError::InvalidTag {
        tag: "for".to_string(),
        message: format!("expected 'for [key,] value of expression', found '{code}'"),
        position,
    };
    let captures = FOR_PATTERN.as_ref().and_then(|re| re.captures(rest)).ok_or_else(invalid)?;

    let key = captures.get(1).map(|m| m.as_str().to_string());
    let value = captures.get(2).ok_or_else(invalid)?.as_str().to_string();
    let iterable_code = captures.get(3).ok_or_else(invalid)?.as_str();
    let iterable = parse_expression(iterable_code, position)?;
    let iterable = env.compile_filters(tokens, iterable, false)?;

    let body = env.compile_tokens(tokens, &["/for"])?;
    expect_close(tokens, "for", "/for", position)?;

    Ok(Some(Node::For {
        key,
        value,
        iterable,
        body,
    }))
}

static SET_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)^([A-Za-z_$][\w$]*)\s*(?:=\s*(.*))?$").ok());

/// `{{ set name = value }}`, `{{ set name }} ... {{ /set }}` and the same
/// forms with `export`.
fn set_tag(
    env: &Environment,
    code: &str,
    position: usize,
    tokens: &mut TokenStream,
) -> Result<Option<Node>, TemplateError> {
    let (keyword, rest, export) = if let Some(rest) = strip_keyword(code, "set") {
        ("set", rest, false)
    } else if let Some(rest) = strip_keyword(code, "export") {
        ("export", rest, true)
    } else {
        return Ok(None);
    };

    let captures = SET_PATTERN.as_ref().and_then(|re| re.captures(rest)).ok_or_else(|| {
        TemplateError::InvalidTag {
            tag: keyword.to_string(),
            message: format!("expected '{keyword} name = value', found '{code}'"),
            position,
        }
    })?;
    let name = captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();

    let value = match captures.get(2) {
        Some(expression) => {
            let value = parse_expression(expression.as_str(), position)?;
            env.compile_filters(tokens, value, false)?
        }
        None => {
            // Filters on the opening tag apply to the captured block.
            let mut filters: TokenStream =
                tokens.take_while(|token| token.kind == TokenKind::Filter).into();
            let close = format!("/{keyword}");
            let body = env.compile_tokens(tokens, &[close.as_str()])?;
            expect_close(tokens, keyword, &close, position)?;
            env.compile_filters(&mut filters, Expr::Capture(body), false)?
        }
    };

    Ok(Some(Node::Set {
        name,
        value,
        export,
    }))
}

/// `{{ include "file" [data] }}`
fn include_tag(
    env: &Environment,
    code: &str,
    position: usize,
    tokens: &mut TokenStream,
) -> Result<Option<Node>, TemplateError> {
    let Some(rest) = strip_keyword(code, "include") else {
        return Ok(None);
    };
    let (file, data) = file_and_data("include", rest, position)?;
    let include = Expr::Include {
        file: Box::new(file),
        data: data.map(Box::new),
    };
    Ok(Some(Node::Output(env.compile_filters(tokens, include, false)?)))
}

/// `{{ layout "file" [data] }} ... {{ /layout }}`
fn layout_tag(
    env: &Environment,
    code: &str,
    position: usize,
    tokens: &mut TokenStream,
) -> Result<Option<Node>, TemplateError> {
    let Some(rest) = strip_keyword(code, "layout") else {
        return Ok(None);
    };
    let (file, data) = file_and_data("layout", rest, position)?;
    let body = env.compile_tokens(tokens, &["/layout"])?;
    expect_close(tokens, "layout", "/layout", position)?;
    Ok(Some(Node::Layout {
        file,
        data,
        body,
    }))
}

fn file_and_data(
    tag: &str,
    code: &str,
    position: usize,
) -> Result<(Expr, Option<Expr>), TemplateError> {
    let mut parts = parse_sequence(code, position, 2)?.into_iter();
    let file = parts.next().ok_or_else(|| TemplateError::InvalidTag {
        tag: tag.to_string(),
        message: "missing file name".to_string(),
        position,
    })?;
    Ok((file, parts.next()))
}
