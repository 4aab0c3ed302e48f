//! Filters applied with `|>` and the built-in filter library.
//!
//! Filters are resolved by name against the environment's filter table at
//! compile time. A filter receives a [`FilterContext`] exposing the template
//! data and the environment, the value of the expression it is applied to and
//! its evaluated arguments.
//!
//! ```text
//! {{ title |> upper }}
//! {{ tags |> join(", ") }}
//! {{ await remote |> fetch("json") }}
//! ```

use std::sync::{Arc, LazyLock};

use anyhow::{Result, bail};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::environment::Environment;
use super::value::{Data, length_of, stringify};

/// Everything a filter can see besides its input and arguments.
pub struct FilterContext<'a> {
    pub data: &'a Data,
    pub env: &'a Environment,
}

/// A named transform applied to an expression's value.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Async filters make the templates using them async.
    fn is_async(&self) -> bool {
        false
    }

    async fn apply(&self, ctx: &FilterContext<'_>, value: Value, args: Vec<Value>) -> Result<Value>;
}

/// Adapter registering a synchronous closure as a [`Filter`].
pub struct FnFilter<F>(pub F);

#[async_trait]
impl<F> Filter for FnFilter<F>
where
    F: Fn(&FilterContext<'_>, Value, &[Value]) -> Result<Value> + Send + Sync,
{
    async fn apply(&self, ctx: &FilterContext<'_>, value: Value, args: Vec<Value>) -> Result<Value> {
        (self.0)(ctx, value, &args)
    }
}

/// Parsed form of a filter token: `[await] name[(args)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterInvocation {
    pub is_async: bool,
    pub name: String,
    pub args: Option<String>,
}

impl FilterInvocation {
    pub fn parse(text: &str) -> Option<Self> {
        let captures = INVOCATION.as_ref()?.captures(text.trim())?;
        Some(Self {
            is_async: captures.get(1).is_some(),
            name: captures.get(2)?.as_str().to_string(),
            args: captures.get(3).map(|m| m.as_str().trim().to_string()).filter(|a| !a.is_empty()),
        })
    }
}

static INVOCATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)^(await\s+)?([A-Za-z_$][\w$]*)\s*(?:\((.*)\))?$").ok());

/// Escape the HTML special characters of `text`.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Reverse of [`escape_html`].
pub fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn sync_filter<F>(f: F) -> Arc<dyn Filter>
where
    F: Fn(&FilterContext<'_>, Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnFilter(f))
}

fn string_filter(f: fn(&str) -> String) -> Arc<dyn Filter> {
    sync_filter(move |_: &FilterContext<'_>, value: Value, _: &[Value]| {
        Ok(Value::String(f(&stringify(&value))))
    })
}

/// The filters every environment starts with.
pub(crate) fn builtin_filters() -> Vec<(&'static str, Arc<dyn Filter>)> {
    vec![
        ("escape", string_filter(escape_html)),
        ("unescape", string_filter(unescape_html)),
        ("upper", string_filter(str::to_uppercase)),
        ("lower", string_filter(str::to_lowercase)),
        ("trim", string_filter(|s| s.trim().to_string())),
        (
            "join",
            sync_filter(|_: &FilterContext<'_>, value: Value, args: &[Value]| {
                let separator = args.first().map(stringify).unwrap_or_else(|| ",".to_string());
                match value {
                    Value::Array(items) => Ok(Value::String(
                        items.iter().map(stringify).collect::<Vec<_>>().join(&separator),
                    )),
                    other => Ok(Value::String(stringify(&other))),
                }
            }),
        ),
        (
            "json",
            sync_filter(|_: &FilterContext<'_>, value: Value, args: &[Value]| {
                let pretty = args.first().is_some_and(|v| v.as_bool().unwrap_or(true));
                let text = if pretty {
                    serde_json::to_string_pretty(&value)?
                } else {
                    serde_json::to_string(&value)?
                };
                Ok(Value::String(text))
            }),
        ),
        (
            "length",
            sync_filter(|_: &FilterContext<'_>, value: Value, _: &[Value]| {
                match length_of(&value) {
                    Some(len) => Ok(Value::from(len)),
                    None if value.is_null() => Ok(Value::from(0)),
                    None => bail!("Cannot take the length of {value}"),
                }
            }),
        ),
        (
            "default",
            sync_filter(|_: &FilterContext<'_>, value: Value, args: &[Value]| {
                if value.is_null() || value.as_str() == Some("") {
                    Ok(args.first().cloned().unwrap_or(Value::Null))
                } else {
                    Ok(value)
                }
            }),
        ),
    ]
}
