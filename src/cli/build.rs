//! `vellum build`: render a site directory.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::CliConfig;
use crate::site::Site;

#[derive(Args)]
pub struct BuildCommand {
    /// Source directory (overrides `src` in vellum.toml)
    #[arg(long)]
    src: Option<PathBuf>,

    /// Output directory (overrides `dest` in vellum.toml)
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Write `about.vto` to `/about.html` instead of `/about/index.html`
    #[arg(long)]
    no_pretty_urls: bool,
}

impl BuildCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let mut config = cli.load_site_config().await?;
        if let Some(src) = self.src {
            config.src = src;
        }
        if let Some(dest) = self.dest {
            config.dest = dest;
        }
        if self.no_pretty_urls {
            config.pretty_urls = false;
        }

        let dest = config.dest.clone();
        let summary = Site::new(config).build().await?;

        println!(
            "{} Built {} pages into {}",
            "✓".green(),
            summary.written,
            dest.display().to_string().bright_white()
        );
        if !summary.on_demand.is_empty() {
            println!("  {} pages left for on-demand rendering", summary.on_demand.len());
        }
        Ok(())
    }
}
