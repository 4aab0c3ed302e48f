//! Generic TOML parsing with file path context.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::core::VellumError;

/// Parse a TOML configuration file into `T`.
///
/// A missing file is reported as [`VellumError::ConfigNotFound`], a malformed
/// one as [`VellumError::ConfigParse`].
pub async fn parse_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(VellumError::ConfigNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read config file: {}", path.display()));
        }
    };

    toml::from_str(&content).map_err(|err| {
        VellumError::ConfigParse {
            file: path.display().to_string(),
            reason: err.message().to_string(),
        }
        .into()
    })
}
