//! Template loaders: path resolution and source retrieval.
//!
//! Paths handed around by the environment are virtual, `/`-separated and
//! rooted at the site source directory. A reference is resolved as follows:
//!
//! - `./x` and `../x` relative to the directory of the requesting template,
//! - `/x` as an absolute virtual path,
//! - anything else inside the includes directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::error::TemplateError;
use super::value::Data;
use crate::markdown::frontmatter::FrontmatterParser;
use crate::utils::{dirname, join_path, normalize_path, to_fs_path};

/// A template source and its frontmatter data.
#[derive(Debug, Clone, Default)]
pub struct LoadedSource {
    pub source: String,
    pub data: Data,
}

/// Resolves template references and loads their sources.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Resolve `file` as referenced from the template at `from`.
    fn resolve(&self, from: &str, file: &str) -> String;

    async fn load(&self, path: &str) -> Result<LoadedSource>;
}

/// Shared resolution rule of the built-in loaders.
pub fn resolve_reference(includes: &str, from: &str, file: &str) -> String {
    if file.starts_with("./") || file.starts_with("../") {
        join_path(dirname(from), file)
    } else if file.starts_with('/') {
        normalize_path(file)
    } else {
        join_path(includes, file)
    }
}

/// Loads templates from a directory on disk.
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
    includes: String,
    frontmatter: FrontmatterParser,
}

impl FileLoader {
    /// `includes` is the virtual includes directory, such as `/_includes`.
    pub fn new(root: impl Into<PathBuf>, includes: &str) -> Self {
        Self {
            root: root.into(),
            includes: normalize_path(includes),
            frontmatter: FrontmatterParser::new(),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait]
impl Loader for FileLoader {
    fn resolve(&self, from: &str, file: &str) -> String {
        resolve_reference(&self.includes, from, file)
    }

    async fn load(&self, path: &str) -> Result<LoadedSource> {
        let fs_path = to_fs_path(&self.root, path);
        debug!("Loading template {} from {}", path, fs_path.display());

        let raw = match tokio::fs::read_to_string(&fs_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound {
                    path: path.to_string(),
                }
                .into());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read template: {}", fs_path.display()));
            }
        };

        let parsed = self
            .frontmatter
            .parse(&raw)
            .with_context(|| format!("Invalid frontmatter in {path}"))?;
        Ok(LoadedSource {
            source: parsed.content,
            data: parsed.data,
        })
    }
}

/// Keeps template sources in memory; used by tests and embedders.
#[derive(Debug)]
pub struct MemoryLoader {
    files: DashMap<String, String>,
    includes: String,
    frontmatter: FrontmatterParser,
}

impl MemoryLoader {
    /// A loader whose includes directory is `/_includes`.
    pub fn new() -> Self {
        Self::with_includes("/_includes")
    }

    pub fn with_includes(includes: &str) -> Self {
        Self {
            files: DashMap::new(),
            includes: normalize_path(includes),
            frontmatter: FrontmatterParser::new(),
        }
    }

    /// Add or replace the source stored at `path`.
    pub fn insert(&self, path: &str, source: impl Into<String>) {
        self.files.insert(normalize_path(path), source.into());
    }
}

impl Default for MemoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn resolve(&self, from: &str, file: &str) -> String {
        resolve_reference(&self.includes, from, file)
    }

    async fn load(&self, path: &str) -> Result<LoadedSource> {
        let raw = self
            .files
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TemplateError::NotFound {
                path: path.to_string(),
            })?;

        let parsed = self.frontmatter.parse(&raw)?;
        Ok(LoadedSource {
            source: parsed.content,
            data: parsed.data,
        })
    }
}
