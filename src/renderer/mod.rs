//! Page rendering pipeline.
//!
//! The [`Renderer`] turns a collection of [`Page`]s into rendered output:
//!
//! 1. pages are grouped by their `renderOrder` field and the groups are
//!    rendered one after the other,
//! 2. generator pages are expanded into one page per generated record,
//! 3. every page's content is rendered through the engines of its format,
//! 4. layouts are applied, recursively, through the engines of the layout's
//!    format.
//!
//! Steps 3 and 4 run concurrently within a group, bounded by
//! [`RendererOptions::max_concurrency`]. A group starts only once every page
//! of the previous group has its layouts applied.

pub mod engine;
pub mod formats;
pub mod page;
pub mod processors;

pub use engine::{Engine, MarkdownEngine, TemplateEngine};
pub use formats::{Format, Formats, PageType};
pub use page::{Content, Generator, Page, PageData, PageSrc, RecordStream, RenderedContent};
pub use processors::{PagePreprocessor, Preprocessor, Preprocessors};

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::default_max_concurrency;
use crate::core::VellumError;
use crate::template::loader::resolve_reference;
use crate::template::{Data, Filter, LoadedSource, Loader, TemplateError};
use crate::utils::{deep_merge_json, dirname, join_path, normalize_path};

const DOCTYPE: &str = "<!DOCTYPE html>\n";

#[derive(Debug, Clone)]
pub struct RendererOptions {
    /// Pages rendered at the same time within a batch.
    pub max_concurrency: usize,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Renders pages through the registered formats and their engines.
pub struct Renderer {
    formats: Arc<Formats>,
    /// Reads layout files (source and frontmatter).
    loader: Arc<dyn Loader>,
    preprocessors: Preprocessors,
    options: RendererOptions,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("formats", &self.formats)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    pub fn new(formats: Arc<Formats>, loader: Arc<dyn Loader>, options: RendererOptions) -> Self {
        Self {
            formats,
            loader,
            preprocessors: Preprocessors::new(),
            options,
        }
    }

    pub fn formats(&self) -> &Formats {
        &self.formats
    }

    pub fn preprocessors_mut(&mut self) -> &mut Preprocessors {
        &mut self.preprocessors
    }

    /// Register `helper` with every engine.
    pub fn add_helper(&self, name: &str, helper: Arc<dyn Filter>) {
        for engine in self.formats.iter().flat_map(|format| format.engines.iter()) {
            engine.add_helper(name, Arc::clone(&helper));
        }
    }

    /// Drop the compiled state every engine keeps for `file`.
    pub fn delete_cache(&self, file: &str) {
        for engine in self.formats.iter().flat_map(|format| format.engines.iter()) {
            engine.delete_cache(file);
        }
    }

    /// Render `from`, appending the rendered pages to `to`.
    ///
    /// Pages flagged `ondemand` are moved to `on_demand` without rendering;
    /// generator pages are replaced by the pages they generate.
    pub async fn render_pages(
        &self,
        from: Vec<Page>,
        to: &mut Vec<Page>,
        on_demand: &mut Vec<Page>,
    ) -> Result<()> {
        for (order, group) in group_pages(from) {
            debug!("Rendering group {} ({} pages)", order, group.len());

            let mut pages = Vec::new();
            let mut generators = Vec::new();
            for page in group {
                if page.is_generator() {
                    generators.push(page);
                } else if page.data.is_on_demand() {
                    on_demand.push(page);
                } else {
                    pages.push(page);
                }
            }

            self.preprocessors.run(&mut pages).await?;

            let mut generated = Vec::new();
            for page in &generators {
                let expanded = self
                    .expand_generator(page)
                    .await
                    .map_err(|err| VellumError::page_render(page.source_path(), err))?;
                generated.extend(expanded);
            }
            self.preprocessors.run(&mut generated).await?;
            pages.extend(generated);

            let concurrency = self.options.max_concurrency.max(1);
            let needs_layout: Vec<bool> = stream::iter(pages.iter_mut().map(|page| self.render_content(page)))
                .buffered(concurrency)
                .try_collect()
                .await?;

            stream::iter(
                pages
                    .iter_mut()
                    .zip(needs_layout)
                    .filter(|(_, needs_layout)| *needs_layout)
                    .map(|(page, _)| self.render_layouts(page)),
            )
            .buffered(concurrency)
            .try_collect::<Vec<()>>()
            .await?;

            to.extend(pages);
        }

        Ok(())
    }

    /// Render a single page outside of a batch.
    pub async fn render_page_on_demand(&self, page: &mut Page) -> Result<()> {
        if page.is_generator() {
            return Err(VellumError::GeneratorOnDemand {
                path: page.source_path().to_string(),
            }
            .into());
        }

        let is_asset = self
            .formats
            .get(&page.src.ext)
            .is_some_and(|format| format.page_type == Some(PageType::Asset));
        if is_asset {
            page.content = match &page.data.content {
                Some(Content::Text(text)) => Some(RenderedContent::Text(text.clone())),
                Some(Content::Bytes(bytes)) => Some(RenderedContent::Bytes(bytes.clone())),
                _ => None,
            };
            return Ok(());
        }

        let path = page.source_path().to_string();
        let content =
            self.render_page(page).await.map_err(|err| VellumError::page_render(&path, err))?;
        if page.data.layout().is_none() {
            page.content = Some(with_doctype(page, content));
            return Ok(());
        }

        let children = text_of(content);
        let rendered = self
            .resolve_layout(page, children)
            .await
            .map_err(|err| VellumError::layout_render(&path, err))?;
        page.content = Some(with_doctype(page, RenderedContent::Text(rendered)));
        Ok(())
    }

    /// Render the content of `page`; returns whether layouts must follow.
    async fn render_content(&self, page: &mut Page) -> Result<bool> {
        debug!("Rendering page {}", page.source_path());
        let content = self
            .render_page(page)
            .await
            .map_err(|err| VellumError::page_render(page.source_path(), err))?;

        let is_html = page.output_path.as_deref().is_some_and(|path| path.ends_with(".html"));
        if is_html || page.data.layout().is_some() {
            page.data.fields.insert("children".to_string(), Value::String(text_of(content)));
            Ok(true)
        } else {
            page.content = Some(content);
            Ok(false)
        }
    }

    async fn render_layouts(&self, page: &mut Page) -> Result<()> {
        let children = page
            .data
            .get_str("children")
            .map(str::to_string)
            .unwrap_or_default();
        let content = self
            .resolve_layout(page, children)
            .await
            .map_err(|err| VellumError::layout_render(page.source_path(), err))?;
        page.content = Some(with_doctype(page, RenderedContent::Text(content)));
        Ok(())
    }

    /// Render the declared content of `page` through its engines.
    async fn render_page(&self, page: &Page) -> Result<RenderedContent> {
        let path = page.source_path();
        let data = &page.data.fields;

        match &page.data.content {
            Some(Content::Generator(_)) => Err(VellumError::GeneratorOnDemand {
                path: path.to_string(),
            }
            .into()),
            Some(Content::Bytes(bytes)) => {
                if self.select_engines(path, data, false)?.is_empty() {
                    return Ok(RenderedContent::Bytes(bytes.clone()));
                }
                let text = String::from_utf8(bytes.clone())
                    .with_context(|| format!("{path} is not valid UTF-8 text"))?;
                Ok(RenderedContent::Text(self.render(&text, data, path, false).await?))
            }
            Some(Content::Text(text)) => {
                Ok(RenderedContent::Text(self.render(text, data, path, false).await?))
            }
            None => Ok(RenderedContent::Text(self.render("", data, path, false).await?)),
        }
    }

    /// Expand a generator page into the pages of its records.
    ///
    /// Records without a usable `url` are skipped.
    async fn expand_generator(&self, page: &Page) -> Result<Vec<Page>> {
        let Some(Content::Generator(generator)) = &page.data.content else {
            return Ok(Vec::new());
        };

        let base = page.data.url().map(dirname).filter(|base| !base.is_empty()).unwrap_or("/");
        let mut records = generator.generate(page.data.fields.clone());
        let mut pages = Vec::new();
        let mut index = 0;

        while let Some(record) = records.try_next().await? {
            let current = index;
            index += 1;

            let Some(url) = record_url(&record, base) else {
                warn!("Skipping page {} generated by {}: no url", current, page.source_path());
                continue;
            };

            let merged = match deep_merge_json(
                Value::Object(page.data.fields.clone()),
                &Value::Object(record.clone()),
            ) {
                Value::Object(map) => map,
                _ => record.clone(),
            };

            let mut generated = page.duplicate(current, merged);
            generated.set_url(&url);

            match page::normalize_date(generated.data.get("date"), page.src.created) {
                Some(date) => {
                    generated.data.fields.insert("date".to_string(), Value::String(date));
                }
                None => {
                    generated.data.fields.remove("date");
                }
            }

            let layout = if record.contains_key("layout") {
                record.get("layout").cloned()
            } else {
                page.data.get("layout").cloned()
            };
            match layout {
                Some(layout) => generated.data.fields.insert("layout".to_string(), layout),
                None => generated.data.fields.remove("layout"),
            };

            pages.push(generated);
        }

        debug!("Generator {} produced {} pages", page.source_path(), pages.len());
        Ok(pages)
    }

    /// Apply the layout chain of `page` to `content`.
    pub async fn resolve_layout(&self, page: &Page, mut content: String) -> Result<String> {
        let mut data = page.data.fields.clone();
        let mut path = page.source_path().to_string();
        let mut layout = page.data.layout().map(str::to_string);
        let mut visited: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        while let Some(name) = layout.take() {
            let format = self.formats.search(&name).ok_or_else(|| VellumError::UnknownLayoutFormat {
                layout: name.clone(),
            })?;
            if format.engines.is_empty() {
                return Err(VellumError::LayoutWithoutEngine {
                    layout: name,
                }
                .into());
            }
            let includes = format.includes().ok_or_else(|| VellumError::LayoutWithoutIncludes {
                layout: name.clone(),
            })?;

            let layout_path = resolve_reference(includes, &path, &name);
            visited.push(layout_path.clone());
            if !seen.insert(layout_path.clone()) {
                return Err(VellumError::LayoutCycle {
                    chain: visited,
                }
                .into());
            }

            let LoadedSource {
                source,
                data: layout_data,
            } = self.loader.load(&layout_path).await.map_err(|err| {
                match err.downcast_ref::<TemplateError>() {
                    Some(TemplateError::NotFound {
                        ..
                    }) => VellumError::LayoutNotFound {
                        layout: name.clone(),
                        path: layout_path.clone(),
                    }
                    .into(),
                    _ => err,
                }
            })?;

            debug!("Applying layout {} to {}", layout_path, page.source_path());
            data.remove("layout");
            data.remove("templateEngine");
            layout = layout_data.get("layout").and_then(Value::as_str).filter(|l| !l.is_empty()).map(str::to_string);

            let mut merged = layout_data;
            merged.extend(data);
            merged.insert("content".to_string(), Value::String(content));

            content = self.render(&source, &merged, &layout_path, true).await?;
            data = merged;
            path = layout_path;
        }

        Ok(content)
    }

    /// Engines that render `path`, in application order.
    ///
    /// A `templateEngine` field (comma separated or a list of names) overrides
    /// the format's engines. Only page formats are rendered, except for
    /// layouts which always use their format's engines.
    pub fn select_engines(
        &self,
        path: &str,
        data: &Data,
        is_layout: bool,
    ) -> Result<Vec<Arc<dyn Engine>>> {
        let names: Option<Vec<String>> = match data.get("templateEngine") {
            Some(Value::String(names)) => Some(
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Some(Value::Array(names)) => {
                Some(names.iter().map(crate::template::value::stringify).collect())
            }
            _ => None,
        };

        if let Some(names) = names {
            let mut engines = Vec::new();
            for name in names {
                let format = self
                    .formats
                    .get(&format!(".{name}"))
                    .filter(|format| !format.engines.is_empty())
                    .ok_or_else(|| VellumError::UnknownTemplateEngine {
                        name: name.clone(),
                        path: path.to_string(),
                    })?;
                engines.extend(format.engines.iter().cloned());
            }
            return Ok(engines);
        }

        match self.formats.search(path) {
            Some(format) if is_layout || format.page_type == Some(PageType::Page) => {
                Ok(format.engines.clone())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Pipe `content` through the engines selected for `filename`.
    pub async fn render(
        &self,
        content: &str,
        data: &Data,
        filename: &str,
        is_layout: bool,
    ) -> Result<String> {
        let mut content = content.to_string();
        for engine in self.select_engines(filename, data, is_layout)? {
            content = engine.render(&content, data, filename, is_layout).await?;
        }
        Ok(content)
    }
}

/// The URL a generated record asks for, resolved against `base`.
fn record_url(record: &Data, base: &str) -> Option<String> {
    match record.get("url") {
        Some(Value::String(url)) if url.starts_with('/') => Some(normalize_path(url)),
        Some(Value::String(url)) if !url.is_empty() => Some(join_path(base, url)),
        _ => None,
    }
}

fn text_of(content: RenderedContent) -> String {
    match content {
        RenderedContent::Text(text) => text,
        RenderedContent::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
    }
}

/// Prefix HTML output with a doctype unless it already has one.
fn with_doctype(page: &Page, content: RenderedContent) -> RenderedContent {
    let is_html = page.output_path.as_deref().is_some_and(|path| path.ends_with(".html"));
    match content {
        RenderedContent::Text(text) if is_html => RenderedContent::Text(ensure_doctype(text)),
        other => other,
    }
}

pub fn ensure_doctype(content: String) -> String {
    let has_doctype = content
        .trim_start()
        .get(..9)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("<!doctype"));
    if has_doctype { content } else { format!("{DOCTYPE}{content}") }
}

/// Grouping key of the `renderOrder` field.
#[derive(Debug, Clone)]
enum RenderOrder {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for RenderOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderOrder::Number(n) => write!(f, "{n}"),
            RenderOrder::Text(text) => write!(f, "{text:?}"),
        }
    }
}

impl Ord for RenderOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (RenderOrder::Number(a), RenderOrder::Number(b)) => a.total_cmp(b),
            (RenderOrder::Number(_), RenderOrder::Text(_)) => Ordering::Less,
            (RenderOrder::Text(_), RenderOrder::Number(_)) => Ordering::Greater,
            (RenderOrder::Text(a), RenderOrder::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for RenderOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RenderOrder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RenderOrder {}

fn render_order(page: &Page) -> RenderOrder {
    match page.data.get("renderOrder") {
        Some(Value::Number(n)) => {
            // -0 and 0 share a group; total_cmp would split them.
            let n = n.as_f64().unwrap_or_default();
            RenderOrder::Number(if n == 0.0 { 0.0 } else { n })
        }
        Some(Value::String(text)) => RenderOrder::Text(text.clone()),
        _ => RenderOrder::Number(0.0),
    }
}

/// Split pages into `renderOrder` groups, in ascending order, keeping the
/// original order within each group.
fn group_pages(pages: Vec<Page>) -> BTreeMap<RenderOrder, Vec<Page>> {
    let mut groups: BTreeMap<RenderOrder, Vec<Page>> = BTreeMap::new();
    for page in pages {
        groups.entry(render_order(&page)).or_default().push(page);
    }
    groups
}
