//! Shared helpers: JSON merging, virtual path handling and filesystem setup.
//!
//! Template and page paths are virtual, `/`-separated paths rooted at the site
//! source directory (`/index.vto`, `/_includes/base.vto`), independent of the
//! host platform. The helpers here manipulate those paths; [`to_fs_path`] maps
//! one onto the real filesystem.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Deep merge two JSON values, with `overrides` taking precedence.
///
/// Objects are merged recursively; any other `overrides` value replaces the
/// corresponding `base` value completely.
///
/// ```rust
/// use serde_json::json;
/// use vellum::utils::deep_merge_json;
///
/// let base = json!({ "site": { "title": "Blog", "lang": "en" } });
/// let overrides = json!({ "site": { "lang": "fr" }, "draft": true });
///
/// let merged = deep_merge_json(base, &overrides);
/// assert_eq!(merged, json!({ "site": { "title": "Blog", "lang": "fr" }, "draft": true }));
/// ```
pub fn deep_merge_json(mut base: Value, overrides: &Value) -> Value {
    match (base.as_object_mut(), overrides.as_object()) {
        (Some(base_obj), Some(override_obj)) => {
            for (key, override_value) in override_obj {
                match base_obj.get_mut(key) {
                    Some(base_value) if base_value.is_object() && override_value.is_object() => {
                        let merged = deep_merge_json(base_value.take(), override_value);
                        *base_value = merged;
                    }
                    _ => {
                        base_obj.insert(key.clone(), override_value.clone());
                    }
                }
            }
            base
        }
        _ => overrides.clone(),
    }
}

/// Directory part of a virtual path: `/a/b.vto` → `/a`, `/a/` → `/a`.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(index) => &path[..index],
        None => "",
    }
}

/// Join `path` onto `base` and normalize the result.
pub fn join_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        return normalize_path(path);
    }
    normalize_path(&format!("{}/{}", base.trim_end_matches('/'), path))
}

/// Resolve `.` and `..` segments and collapse repeated slashes.
///
/// The result is always absolute. A trailing slash is preserved.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut normalized = format!("/{}", segments.join("/"));
    if path.ends_with('/') && normalized.len() > 1 {
        normalized.push('/');
    }
    normalized
}

/// Map a virtual path onto `root`.
pub fn to_fs_path(root: &Path, path: &str) -> PathBuf {
    path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).fold(root.to_path_buf(), |acc, s| acc.join(s))
}

/// Create `path` and its parents if missing.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Write `content` to `path`, creating parent directories as needed.
pub async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write file: {}", path.display()))
}
