//! `vellum run`: render a single template file.

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::CliConfig;
use crate::template::{Data, Environment, FileLoader};

#[derive(Args)]
pub struct RunCommand {
    /// Template file to render
    file: PathBuf,

    /// JSON object passed to the template as data
    #[arg(short, long)]
    data: Option<String>,
}

impl RunCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let config = cli.load_site_config().await?;
        let data = parse_data(self.data.as_deref())?;

        let root = self.file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = self
            .file
            .file_name()
            .with_context(|| format!("{} is not a file", self.file.display()))?
            .to_string_lossy()
            .into_owned();

        let loader = Arc::new(FileLoader::new(root, &config.includes_path()));
        let env = Environment::with_options(loader, config.environment_options());
        let result = env.run(&format!("/{name}"), data, None).await?;

        print!("{}", result.content);
        Ok(())
    }
}

fn parse_data(data: Option<&str>) -> Result<Data> {
    let Some(data) = data else {
        return Ok(Data::new());
    };
    match serde_json::from_str(data).context("--data must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--data must be a JSON object, found {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data() {
        assert!(parse_data(None).unwrap().is_empty());
        let data = parse_data(Some(r#"{"title": "Hi"}"#)).unwrap();
        assert_eq!(data.get("title"), Some(&Value::String("Hi".to_string())));
        assert!(parse_data(Some("[1, 2]")).is_err());
        assert!(parse_data(Some("{")).is_err());
    }
}
