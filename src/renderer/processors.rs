//! Preprocessors: hooks run over pages before they are rendered.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::page::Page;

/// A hook receiving the pages of one render batch.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn process(&self, pages: &mut [&mut Page]) -> Result<()>;
}

/// Adapter running a synchronous closure on every page.
pub struct PagePreprocessor<F>(pub F);

#[async_trait]
impl<F> Preprocessor for PagePreprocessor<F>
where
    F: Fn(&mut Page) -> Result<()> + Send + Sync,
{
    async fn process(&self, pages: &mut [&mut Page]) -> Result<()> {
        for page in pages.iter_mut() {
            (self.0)(page)?;
        }
        Ok(())
    }
}

struct Entry {
    processor: Arc<dyn Preprocessor>,
    /// Only pages with one of these extensions; `None` means every page.
    exts: Option<Vec<String>>,
}

/// Ordered registry of preprocessors.
#[derive(Default)]
pub struct Preprocessors {
    entries: Vec<Entry>,
}

impl Preprocessors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` for pages whose extension is in `exts` (all pages when `None`).
    pub fn set(&mut self, processor: Arc<dyn Preprocessor>, exts: Option<Vec<String>>) {
        self.entries.push(Entry {
            processor,
            exts,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every preprocessor, in registration order, over the matching pages.
    pub async fn run(&self, pages: &mut [Page]) -> Result<()> {
        for entry in &self.entries {
            let mut selected: Vec<&mut Page> = pages
                .iter_mut()
                .filter(|page| match &entry.exts {
                    Some(exts) => exts.iter().any(|ext| *ext == page.src.ext),
                    None => true,
                })
                .collect();
            if !selected.is_empty() {
                entry.processor.process(&mut selected).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Preprocessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preprocessors").field("entries", &self.entries.len()).finish()
    }
}
