//! YAML frontmatter extraction for templates and pages.
//!
//! Source files may start with a `---` delimited YAML block. Its fields become
//! the page data (for pages) or the template defaults (for layouts and
//! includes); the rest of the file is the template source.
//!
//! # Example
//!
//! ```rust
//! use vellum::markdown::frontmatter::FrontmatterParser;
//!
//! let parser = FrontmatterParser::new();
//! let parsed = parser.parse("---\ntitle: Hello\n---\n<h1>{{ title }}</h1>\n").unwrap();
//!
//! assert!(parsed.has_frontmatter());
//! assert_eq!(parsed.data["title"], "Hello");
//! assert_eq!(parsed.content.trim(), "<h1>{{ title }}</h1>");
//! ```

use anyhow::{Context, Result, bail};
use gray_matter::{Matter, engine::YAML};
use serde_json::Value;
use std::fmt::Debug;

use crate::template::Data;

/// Result of splitting a source file into frontmatter data and content.
#[derive(Debug, Clone, Default)]
pub struct ParsedFrontmatter {
    /// Fields of the frontmatter block; empty when there is none.
    pub data: Data,

    /// The content with frontmatter removed.
    pub content: String,

    /// Whether the source started with a frontmatter block.
    pub present: bool,
}

impl ParsedFrontmatter {
    /// Check if frontmatter was present in the original content.
    pub fn has_frontmatter(&self) -> bool {
        self.present
    }
}

/// Splits YAML frontmatter off template sources.
pub struct FrontmatterParser {
    yaml_matter: Matter<YAML>,
}

impl Clone for FrontmatterParser {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Debug for FrontmatterParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontmatterParser").finish()
    }
}

impl Default for FrontmatterParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrontmatterParser {
    pub fn new() -> Self {
        Self {
            yaml_matter: Matter::new(),
        }
    }

    /// Extract frontmatter and content.
    ///
    /// Content without a frontmatter block is returned unchanged with empty
    /// data. Frontmatter that is not a YAML mapping is an error.
    pub fn parse(&self, content: &str) -> Result<ParsedFrontmatter> {
        if !self.has_frontmatter(content) {
            return Ok(ParsedFrontmatter {
                data: Data::new(),
                content: content.to_string(),
                present: false,
            });
        }

        let matter_result = self
            .yaml_matter
            .parse::<Value>(content)
            .context("Unable to parse YAML frontmatter")?;

        let data = match matter_result.data {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Data::new(),
            Some(other) => bail!("Frontmatter must be a mapping of fields, found: {other}"),
        };

        Ok(ParsedFrontmatter {
            data,
            content: matter_result.content,
            present: true,
        })
    }

    /// Check if content starts with a `---` frontmatter delimiter.
    pub fn has_frontmatter(&self, content: &str) -> bool {
        let trimmed = content.trim_start_matches('\u{feff}');
        trimmed.starts_with("---\n") || trimmed.starts_with("---\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_without_frontmatter() {
        let parser = FrontmatterParser::new();
        let parsed = parser.parse("<p>{{ title }}</p>").unwrap();
        assert!(!parsed.has_frontmatter());
        assert!(parsed.data.is_empty());
        assert_eq!(parsed.content, "<p>{{ title }}</p>");
    }

    #[test]
    fn test_parse_nested_fields() {
        let parser = FrontmatterParser::new();
        let parsed = parser
            .parse("---\nlayout: base.vto\ntags:\n  - a\n  - b\nrenderOrder: 1\n---\nBody")
            .unwrap();
        assert_eq!(parsed.data["layout"], "base.vto");
        assert_eq!(parsed.data["tags"], serde_json::json!(["a", "b"]));
        assert_eq!(parsed.data["renderOrder"], 1);
        assert_eq!(parsed.content.trim(), "Body");
    }

    #[test]
    fn test_parse_rejects_scalar_frontmatter() {
        let parser = FrontmatterParser::new();
        assert!(parser.parse("---\njust text\n---\nBody").is_err());
    }
}
