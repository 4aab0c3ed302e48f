//! Template errors and source-position mapping.
//!
//! Compile-time problems are reported as [`TemplateError`] values carrying the
//! byte offset of the offending token. [`create_error`] turns any failure into a
//! located [`SourceError`] that names the template, the line and column and
//! quotes the offending source line.

use thiserror::Error;

/// Errors raised while tokenizing, compiling or executing a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("{message}")]
    Tokenize {
        message: String,
        position: usize,
    },

    #[error("Unknown filter '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownFilter {
        name: String,
        suggestion: Option<String>,
        position: usize,
    },

    #[error("Invalid filter syntax '{text}'")]
    InvalidFilter {
        text: String,
        position: usize,
    },

    #[error("Unclosed tag '{tag}', expected '{expected}'")]
    UnclosedTag {
        tag: String,
        expected: String,
        position: usize,
    },

    #[error("Unexpected {kind} '{text}'")]
    UnexpectedToken {
        kind: String,
        text: String,
        position: usize,
    },

    #[error("Invalid '{tag}' tag: {message}")]
    InvalidTag {
        tag: String,
        message: String,
        position: usize,
    },

    #[error("Invalid expression '{code}': {message}")]
    Syntax {
        code: String,
        message: String,
        position: usize,
    },

    #[error("{message}")]
    Runtime {
        message: String,
    },

    #[error("Template not found: {path}")]
    NotFound {
        path: String,
    },

    #[error("Maximum include depth ({depth}) exceeded while including '{path}'")]
    IncludeDepth {
        path: String,
        depth: usize,
    },

    #[error("Template '{path}' uses async features and cannot run synchronously")]
    AsyncInSync {
        path: String,
    },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion.as_ref().map(|s| format!(" (did you mean '{s}'?)")).unwrap_or_default()
}

impl TemplateError {
    pub fn runtime(message: impl Into<String>) -> Self {
        TemplateError::Runtime {
            message: message.into(),
        }
    }

    /// Byte offset in the template source this error points at, if known.
    pub fn position(&self) -> Option<usize> {
        match self {
            TemplateError::Tokenize {
                position,
                ..
            }
            | TemplateError::UnknownFilter {
                position,
                ..
            }
            | TemplateError::InvalidFilter {
                position,
                ..
            }
            | TemplateError::UnclosedTag {
                position,
                ..
            }
            | TemplateError::UnexpectedToken {
                position,
                ..
            }
            | TemplateError::InvalidTag {
                position,
                ..
            }
            | TemplateError::Syntax {
                position,
                ..
            } => Some(*position),
            _ => None,
        }
    }
}

/// A failure annotated with the template location it happened at.
#[derive(Debug, Error)]
#[error("Error in the template {path}:{line}:{column}\n\n{code}\n\n> {message}")]
pub struct SourceError {
    pub path: String,
    pub line: usize,
    pub column: usize,
    /// Text of the offending source line.
    pub code: String,
    pub message: String,
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync + 'static>,
}

/// Line, column and source text for a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLine {
    pub line: usize,
    pub column: usize,
    pub code: String,
}

/// Compute the 1-based line and column of `position` in `source`.
///
/// `\r\n` counts as a single line break. Positions past the end clamp to the
/// end of the source.
pub fn error_line(source: &str, position: usize) -> ErrorLine {
    let mut line = 1;
    let mut column = 1;
    let mut chars = source.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if index >= position {
            break;
        }
        match ch {
            '\n' => {
                line += 1;
                column = 1;
            }
            '\r' if matches!(chars.peek(), Some((_, '\n'))) => {
                chars.next();
                line += 1;
                column = 1;
            }
            _ => column += 1,
        }
    }

    let code = source.lines().nth(line - 1).unwrap_or_default().to_string();
    ErrorLine {
        line,
        column,
        code,
    }
}

/// Wrap `cause` with the template location derived from `position`.
///
/// Without source text no location can be computed and `cause` is returned
/// unchanged. Errors that already carry a location (for example from an
/// included template) are passed through as well.
pub fn create_error(
    path: Option<&str>,
    source: &str,
    position: usize,
    cause: anyhow::Error,
) -> anyhow::Error {
    if source.is_empty() || cause.downcast_ref::<SourceError>().is_some() {
        return cause;
    }

    let ErrorLine {
        line,
        column,
        code,
    } = error_line(source, position);

    anyhow::Error::new(SourceError {
        path: path.unwrap_or("<anonymous>").to_string(),
        line,
        column,
        code,
        message: cause.to_string(),
        cause: cause.into(),
    })
}
