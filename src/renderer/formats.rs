//! Registry of file formats: page type and engine chain per extension.

use std::sync::Arc;

use super::engine::Engine;

/// How pages of a format are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Rendered through the format's engines.
    Page,
    /// Copied verbatim.
    Asset,
}

#[derive(Clone)]
pub struct Format {
    /// Extension including the leading dot (`.vto`, `.tmpl.md`).
    pub ext: String,
    pub page_type: Option<PageType>,
    /// Engines applied in order; the first one provides the includes directory.
    pub engines: Vec<Arc<dyn Engine>>,
}

impl std::fmt::Debug for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Format")
            .field("ext", &self.ext)
            .field("page_type", &self.page_type)
            .field("engines", &self.engines.len())
            .finish()
    }
}

impl Format {
    pub fn page(ext: impl Into<String>, engines: Vec<Arc<dyn Engine>>) -> Self {
        Self {
            ext: ext.into(),
            page_type: Some(PageType::Page),
            engines,
        }
    }

    pub fn asset(ext: impl Into<String>) -> Self {
        Self {
            ext: ext.into(),
            page_type: Some(PageType::Asset),
            engines: Vec::new(),
        }
    }

    /// The includes directory of the first engine, if any.
    pub fn includes(&self) -> Option<&str> {
        self.engines.first().and_then(|engine| engine.includes())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Formats {
    entries: Vec<Format>,
}

impl Formats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `format`, replacing the one with the same extension.
    pub fn set(&mut self, format: Format) {
        match self.entries.iter_mut().find(|entry| entry.ext == format.ext) {
            Some(entry) => *entry = format,
            None => self.entries.push(format),
        }
    }

    pub fn get(&self, ext: &str) -> Option<&Format> {
        self.entries.iter().find(|entry| entry.ext == ext)
    }

    /// The format whose extension is the longest suffix of `path`.
    pub fn search(&self, path: &str) -> Option<&Format> {
        let lower = path.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| lower.ends_with(&entry.ext.to_lowercase()))
            .max_by_key(|entry| entry.ext.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Format> {
        self.entries.iter()
    }
}
