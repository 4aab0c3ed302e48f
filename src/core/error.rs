//! Error handling for vellum
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** for precise handling in code
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`VellumError`] enumerates the failures of the rendering pipeline, the
//!   site driver and configuration loading. Template compile and runtime
//!   failures live in [`crate::template::TemplateError`] and are located by
//!   [`crate::template::SourceError`].
//! - [`ErrorContext`] wraps a [`VellumError`] with details and a suggestion for
//!   display in the terminal.
//! - [`user_friendly_error`] converts any [`anyhow::Error`] into an
//!   [`ErrorContext`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use vellum::core::{VellumError, ErrorContext, user_friendly_error};
//!
//! let err = anyhow::Error::new(VellumError::UnknownTemplateEngine {
//!     name: "liquid".to_string(),
//!     path: "/index.vto".to_string(),
//! });
//! user_friendly_error(err).display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::template::{SourceError, TemplateError};

type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the rendering pipeline and its drivers.
#[derive(Error, Debug)]
pub enum VellumError {
    /// A page or layout asked for an engine that is not registered.
    #[error("Unknown template engine '{name}' requested by {path}")]
    UnknownTemplateEngine {
        name: String,
        path: String,
    },

    /// No format is registered for the layout's extension.
    #[error("The layout format of '{layout}' is not supported")]
    UnknownLayoutFormat {
        layout: String,
    },

    /// The layout's format has no engine to render it.
    #[error("The layout format of '{layout}' has no template engine")]
    LayoutWithoutEngine {
        layout: String,
    },

    /// The layout's engine has no includes directory to resolve it against.
    #[error("The layout format of '{layout}' does not support includes")]
    LayoutWithoutIncludes {
        layout: String,
    },

    #[error("Layout '{layout}' not found (looked for {path})")]
    LayoutNotFound {
        layout: String,
        path: String,
    },

    /// A layout chain visits the same layout twice.
    #[error("Layout cycle detected: {}", chain.join(" -> "))]
    LayoutCycle {
        chain: Vec<String>,
    },

    #[error("Generator pages cannot be rendered on demand: {path}")]
    GeneratorOnDemand {
        path: String,
    },

    #[error("Error rendering the page {path}")]
    PageRender {
        path: String,
        #[source]
        cause: BoxedCause,
    },

    #[error("Error rendering the layout of the page {path}")]
    LayoutRender {
        path: String,
        #[source]
        cause: BoxedCause,
    },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: String,
    },

    #[error("Invalid configuration file {file}")]
    ConfigParse {
        file: String,
        reason: String,
    },

    #[error("{message}")]
    Other {
        message: String,
    },
}

impl VellumError {
    pub fn page_render(path: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::PageRender {
            path: path.into(),
            cause: cause.into(),
        }
    }

    pub fn layout_render(path: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::LayoutRender {
            path: path.into(),
            cause: cause.into(),
        }
    }
}

/// A [`VellumError`] with optional details and a suggestion for the user.
#[derive(Debug)]
pub struct ErrorContext {
    pub error: VellumError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub const fn new(error: VellumError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr: the error in red, details in yellow and the
    /// suggestion in green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] suitable for the terminal.
///
/// Known error types get tailored suggestions. Everything else is reported
/// with its full cause chain.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let error = match error.downcast::<VellumError>() {
        Ok(vellum_error) => return create_error_context(vellum_error),
        Err(error) => error,
    };

    if let Some(vellum_error) = error.chain().find_map(|e| e.downcast_ref::<VellumError>()) {
        let message = vellum_error.to_string();
        return ErrorContext::new(VellumError::Other {
            message: error.to_string(),
        })
        .with_details(format!("{message}\n\n{}", cause_chain(&error)));
    }

    if let Some(source_error) = error.chain().find_map(|e| e.downcast_ref::<SourceError>()) {
        return ErrorContext::new(VellumError::Other {
            message: source_error.to_string(),
        })
        .with_suggestion("Check the template syntax and that every variable used on that line is defined");
    }

    if let Some(template_error) = error.downcast_ref::<TemplateError>() {
        let suggestion = match template_error {
            TemplateError::NotFound {
                ..
            } => "Check the file name; bare names are looked up in the includes directory",
            TemplateError::AsyncInSync {
                ..
            } => "Render this template with an async entry point",
            _ => "Check the template syntax",
        };
        return ErrorContext::new(VellumError::Other {
            message: template_error.to_string(),
        })
        .with_suggestion(suggestion);
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(VellumError::ConfigParse {
            file: "vellum.toml".to_string(),
            reason: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax in your vellum.toml file. Verify quotes, brackets, and indentation");
    }

    let mut message = error.to_string();
    let chain = cause_chain(&error);
    if !chain.is_empty() {
        message.push_str("\n\n");
        message.push_str(&chain);
    }

    ErrorContext::new(VellumError::Other {
        message,
    })
}

/// "Caused by" listing of everything below the outermost error.
fn cause_chain(error: &anyhow::Error) -> String {
    let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    if causes.is_empty() {
        return String::new();
    }

    let mut message = String::from("Caused by:");
    for (i, cause) in causes.iter().enumerate() {
        message.push_str(&format!("\n  {}: {}", i + 1, cause));
    }
    message
}

fn source_chain(cause: &BoxedCause) -> String {
    let mut message = cause.to_string();
    let mut next = cause.source();
    while let Some(inner) = next {
        message.push_str(&format!("\n  caused by: {inner}"));
        next = inner.source();
    }
    message
}

fn create_error_context(error: VellumError) -> ErrorContext {
    match &error {
        VellumError::UnknownTemplateEngine {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Use one of the registered engines in 'templateEngine' (for example \"vto\" or \"md\")"),

        VellumError::UnknownLayoutFormat {
            ..
        }
        | VellumError::LayoutWithoutEngine {
            ..
        }
        | VellumError::LayoutWithoutIncludes {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Layouts must use a template format such as .vto")
            .with_details("Layouts are resolved as includes and rendered by their format's template engine"),

        VellumError::LayoutNotFound {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Create the layout in the includes directory or fix the 'layout' field"),

        VellumError::LayoutCycle {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Remove the 'layout' field from one of the layouts in the chain"),

        VellumError::GeneratorOnDemand {
            ..
        } => ErrorContext::new(error)
            .with_details("Generator pages expand into several pages and are only rendered in a full build"),

        VellumError::PageRender {
            cause,
            ..
        }
        | VellumError::LayoutRender {
            cause,
            ..
        } => {
            let details = source_chain(cause);
            ErrorContext::new(error).with_details(details)
        }

        VellumError::ConfigNotFound {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Create a vellum.toml file or pass --config with the path to one"),

        VellumError::ConfigParse {
            reason,
            ..
        } => {
            let details = reason.clone();
            ErrorContext::new(error)
                .with_details(details)
                .with_suggestion("Check the TOML syntax in your configuration file")
        }

        VellumError::Other {
            ..
        } => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_cycle_message() {
        let err = VellumError::LayoutCycle {
            chain: vec!["/_includes/a.vto".to_string(), "/_includes/b.vto".to_string(), "/_includes/a.vto".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Layout cycle detected: /_includes/a.vto -> /_includes/b.vto -> /_includes/a.vto"
        );
    }

    #[test]
    fn test_page_render_keeps_cause_in_details() {
        let err = VellumError::page_render("/index.vto", anyhow::anyhow!("boom"));
        let context = user_friendly_error(err.into());
        assert_eq!(context.error.to_string(), "Error rendering the page /index.vto");
        assert_eq!(context.details.as_deref(), Some("boom"));
    }

    #[test]
    fn test_context_wrapped_vellum_error_is_recognized() {
        let err = anyhow::Error::new(VellumError::GeneratorOnDemand {
            path: "/gen.vto".to_string(),
        })
        .context("Failed to build site");
        let context = user_friendly_error(err);
        assert!(matches!(context.error, VellumError::GeneratorOnDemand { .. }));
        assert!(context.details.is_some());
    }

    #[test]
    fn test_nested_cause_is_found_in_chain() {
        #[derive(Debug, Error)]
        #[error("outer")]
        struct Outer(#[source] VellumError);

        let inner = VellumError::LayoutCycle {
            chain: vec!["/a.vto".to_string(), "/a.vto".to_string()],
        };
        let err = anyhow::Error::new(Outer(inner));
        let context = user_friendly_error(err);
        assert!(context.details.unwrap().contains("Layout cycle detected"));
    }

    #[test]
    fn test_display_includes_suggestion() {
        let context = ErrorContext::new(VellumError::ConfigNotFound {
            path: "vellum.toml".to_string(),
        })
        .with_suggestion("create it");
        assert_eq!(context.to_string(), "Configuration file not found: vellum.toml\nSuggestion: create it");
    }
}
