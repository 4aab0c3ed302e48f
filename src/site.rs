//! Site driver: scans a source directory, renders its pages and writes the
//! output directory.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::config::SiteConfig;
use crate::markdown::frontmatter::FrontmatterParser;
use crate::renderer::page::normalize_date;
use crate::renderer::{
    Content, Engine, Format, Formats, MarkdownEngine, Page, PageData, PageSrc, PageType,
    RenderedContent, Renderer, TemplateEngine,
};
use crate::template::{Data, Environment, FileLoader, Loader};
use crate::utils::{dirname, join_path, normalize_path, to_fs_path, write_file};

/// Outcome of [`Site::build`].
#[derive(Debug, Default)]
pub struct BuildSummary {
    /// Pages written to the output directory.
    pub written: usize,
    /// Pages left for on-demand rendering.
    pub on_demand: Vec<Page>,
}

pub struct Site {
    config: SiteConfig,
    env: Arc<Environment>,
    renderer: Renderer,
}

impl Site {
    /// Set up the default formats: `.vto` templates, `.md` templates rendered
    /// as markdown, and the configured asset extensions.
    pub fn new(config: SiteConfig) -> Self {
        let includes = config.includes_path();
        let loader: Arc<dyn Loader> = Arc::new(FileLoader::new(&config.src, &includes));
        let env = Arc::new(Environment::with_options(
            Arc::clone(&loader),
            config.environment_options(),
        ));

        let template: Arc<dyn Engine> = Arc::new(TemplateEngine::new(Arc::clone(&env), includes));
        let markdown: Arc<dyn Engine> = Arc::new(MarkdownEngine);

        let mut formats = Formats::new();
        for ext in &config.assets {
            formats.set(Format::asset(ext.clone()));
        }
        formats.set(Format::page(".vto", vec![Arc::clone(&template)]));
        formats.set(Format::page(".md", vec![template, markdown]));

        let renderer = Renderer::new(Arc::new(formats), loader, config.renderer_options());
        Self {
            config,
            env,
            renderer,
        }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    /// Scan the source directory and render every page into the output
    /// directory.
    pub async fn build(&self) -> Result<BuildSummary> {
        info!("Building {} into {}", self.config.src.display(), self.config.dest.display());
        let pages = self.load_pages().await?;
        self.render(pages).await
    }

    /// Render `pages` and write the results.
    pub async fn render(&self, pages: Vec<Page>) -> Result<BuildSummary> {
        let mut rendered = Vec::new();
        let mut on_demand = Vec::new();
        self.renderer.render_pages(pages, &mut rendered, &mut on_demand).await?;

        let mut written = 0;
        for page in &rendered {
            if self.write_page(page).await? {
                written += 1;
            }
        }

        info!("Wrote {} pages ({} on demand)", written, on_demand.len());
        Ok(BuildSummary {
            written,
            on_demand,
        })
    }

    pub async fn render_on_demand(&self, page: &mut Page) -> Result<()> {
        self.renderer.render_page_on_demand(page).await
    }

    async fn write_page(&self, page: &Page) -> Result<bool> {
        let (Some(output_path), Some(content)) = (&page.output_path, &page.content) else {
            debug!("Skipping {}: nothing to write", page.source_path());
            return Ok(false);
        };

        let target = to_fs_path(&self.config.dest, output_path);
        let bytes = match content {
            RenderedContent::Text(text) => text.as_bytes(),
            RenderedContent::Bytes(bytes) => bytes.as_slice(),
        };
        write_file(&target, bytes).await?;
        debug!("Wrote {} -> {}", page.source_path(), target.display());
        Ok(true)
    }

    /// Read every page and asset below the source directory.
    ///
    /// Entries starting with `_` or `.` and the includes directory are skipped,
    /// as are files with no registered format.
    pub async fn load_pages(&self) -> Result<Vec<Page>> {
        let src = &self.config.src;
        let includes_dir = to_fs_path(src, &self.config.includes_path());
        let parser = FrontmatterParser::new();
        let mut pages = Vec::new();

        let walker = WalkDir::new(src)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_ignored(entry, &includes_dir));

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to scan {}", src.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = virtual_path(src, entry.path())?;
            let Some(format) = self.renderer.formats().search(&path) else {
                debug!("Ignoring {}: no format", path);
                continue;
            };

            let created = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.created().or_else(|_| meta.modified()).ok())
                .map(DateTime::<Utc>::from);
            let page_src = PageSrc {
                path: path.clone(),
                ext: format.ext.clone(),
                created,
            };

            let page = if format.page_type == Some(PageType::Asset) {
                let bytes = tokio::fs::read(entry.path())
                    .await
                    .with_context(|| format!("Failed to read {}", entry.path().display()))?;
                let mut page = Page::new(page_src, PageData::new(Some(Content::Bytes(bytes)), Data::new()));
                page.set_url(&path);
                page
            } else {
                let source = tokio::fs::read_to_string(entry.path())
                    .await
                    .with_context(|| format!("Failed to read {}", entry.path().display()))?;
                let parsed = parser
                    .parse(&source)
                    .with_context(|| format!("Invalid frontmatter in {path}"))?;

                let mut data = parsed.data;
                if let Some(date) = normalize_date(data.get("date"), created) {
                    data.insert("date".to_string(), Value::String(date));
                }
                let url = page_url(&path, &format.ext, &data, self.config.pretty_urls);

                let mut page = Page::new(page_src, PageData::new(Some(Content::Text(parsed.content)), data));
                if let Some(url) = url {
                    page.set_url(&url);
                }
                page
            };
            pages.push(page);
        }

        debug!("Loaded {} pages from {}", pages.len(), src.display());
        Ok(pages)
    }
}

fn is_ignored(entry: &DirEntry, includes_dir: &Path) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('_') || name.starts_with('.') || entry.path() == includes_dir
}

fn virtual_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside of {}", path.display(), root.display()))?;
    let segments: Vec<String> =
        relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    Ok(format!("/{}", segments.join("/")))
}

/// URL of a page: an explicit `url` field wins, `url: false` means the page
/// is not written. Otherwise `index` files map to their directory and other
/// files to `/name/` (pretty URLs) or `/name.html`.
pub fn page_url(path: &str, ext: &str, data: &Data, pretty: bool) -> Option<String> {
    match data.get("url") {
        Some(Value::String(url)) if url.starts_with('/') => return Some(normalize_path(url)),
        Some(Value::String(url)) if !url.is_empty() => return Some(join_path(dirname(path), url)),
        Some(Value::Bool(false)) => return None,
        _ => {}
    }

    let stem = path.get(..path.len().saturating_sub(ext.len())).unwrap_or(path);
    if let Some(dir) = stem.strip_suffix("/index") {
        return Some(format!("{dir}/"));
    }
    Some(if pretty { format!("{stem}/") } else { format!("{stem}.html") })
}
