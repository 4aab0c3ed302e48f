//! Command-line interface for vellum.
//!
//! # Commands
//!
//! - `build` - render a site directory into its output directory
//! - `run` - render a single template file to stdout
//!
//! ```bash
//! vellum build --src site --dest public
//! vellum run page.vto --data '{"title": "Hello"}'
//! vellum --verbose build
//! ```
//!
//! Logging goes to stderr. `--verbose` enables debug output, `--quiet` shows
//! errors only, and `RUST_LOG` takes precedence over both.

mod build;
mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::SiteConfig;

/// Global settings derived from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter applied when `RUST_LOG` is not set.
    pub log_level: String,
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Install the global tracing subscriber. Later calls are ignored.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("vellum={}", self.log_level)));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Load the site configuration named on the command line, if any.
    pub async fn load_site_config(&self) -> Result<SiteConfig> {
        SiteConfig::load_with_optional(self.config_path.as_deref()).await
    }
}

#[derive(Parser)]
#[command(
    name = "vellum",
    about = "Render templates and static sites",
    version,
    long_about = "vellum compiles templates and renders pages through layouts, generators and format engines."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a vellum.toml configuration file
    #[arg(short, long, global = true, env = "VELLUM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a site directory
    Build(build::BuildCommand),

    /// Render one template file to stdout
    Run(run::RunCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        };

        CliConfig {
            log_level: log_level.to_string(),
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();

        match self.command {
            Commands::Build(cmd) => cmd.execute(&config).await,
            Commands::Run(cmd) => cmd.execute(&config).await,
        }
    }
}
