//! Site configuration.
//!
//! A site is configured by an optional `vellum.toml` at the project root:
//!
//! ```toml
//! src = "."
//! dest = "_site"
//! includes = "_includes"
//! autoescape = false
//! pretty_urls = true
//! max_concurrency = 16
//! assets = [".css", ".js"]
//! ```
//!
//! Every field is optional. Relative `src` and `dest` paths are resolved
//! against the directory holding the configuration file.

mod parser;

pub use parser::parse_config;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::default_max_concurrency;
use crate::renderer::RendererOptions;
use crate::template::EnvironmentOptions;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "vellum.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Directory scanned for pages.
    pub src: PathBuf,
    /// Directory the rendered site is written to.
    pub dest: PathBuf,
    /// Includes directory, as a path relative to `src`.
    pub includes: String,
    pub autoescape: bool,
    pub data_var: String,
    pub auto_data_vars: bool,
    /// Render `about.vto` to `/about/index.html` instead of `/about.html`.
    pub pretty_urls: bool,
    pub max_concurrency: usize,
    /// Extensions copied verbatim.
    pub assets: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            src: PathBuf::from("."),
            dest: PathBuf::from("_site"),
            includes: "_includes".to_string(),
            autoescape: false,
            data_var: "it".to_string(),
            auto_data_vars: true,
            pretty_urls: true,
            max_concurrency: default_max_concurrency(),
            assets: [".css", ".js", ".txt", ".svg", ".png", ".jpg", ".gif", ".ico", ".woff2"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl SiteConfig {
    /// Load `vellum.toml` from the working directory, or the defaults when
    /// there is none.
    pub async fn load() -> Result<Self> {
        let path = PathBuf::from(CONFIG_FILE);
        if path.exists() { Self::load_from(&path).await } else { Ok(Self::default()) }
    }

    /// Load from an explicit path, which must exist, or fall back to [`Self::load`].
    pub async fn load_with_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path).await,
            None => Self::load().await,
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let mut config: Self = parse_config(path).await?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.src = base.join(&config.src);
        config.dest = base.join(&config.dest);
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Virtual path of the includes directory (`/_includes`).
    pub fn includes_path(&self) -> String {
        crate::utils::normalize_path(&self.includes)
    }

    pub fn environment_options(&self) -> EnvironmentOptions {
        EnvironmentOptions {
            autoescape: self.autoescape,
            data_var: self.data_var.clone(),
            auto_data_vars: self.auto_data_vars,
        }
    }

    pub fn renderer_options(&self) -> RendererOptions {
        RendererOptions {
            max_concurrency: self.max_concurrency.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = SiteConfig::default();
        assert_eq!(config.dest, PathBuf::from("_site"));
        assert_eq!(config.includes_path(), "/_includes");
        assert!(config.pretty_urls);
        assert!(config.max_concurrency >= crate::constants::MIN_PARALLELISM);
        assert_eq!(config.environment_options(), EnvironmentOptions::default());
    }

    #[tokio::test]
    async fn test_load_from_resolves_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "src = \"site\"\nautoescape = true\n").await.unwrap();

        let config = SiteConfig::load_from(&path).await.unwrap();
        assert_eq!(config.src, dir.path().join("site"));
        assert_eq!(config.dest, dir.path().join("_site"));
        assert!(config.autoescape);
        assert_eq!(config.data_var, "it");
    }
}
