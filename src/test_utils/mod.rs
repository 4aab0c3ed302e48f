//! Shared helpers for unit and integration tests.
//!
//! Available in unit tests and, through the `test-utils` feature, in the
//! integration test suite.

use std::sync::{Arc, Mutex, Once};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::renderer::{Engine, Page, PageData, PageSrc};
use crate::template::{Data, Filter};

static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// With `level` set, that level is used; otherwise logging is enabled only
/// when `RUST_LOG` is set.
///
/// ```bash
/// RUST_LOG=vellum=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// Build a page from a virtual path and a JSON object of fields.
///
/// A `content` string field becomes the page's declared content.
pub fn page(path: &str, fields: Value) -> Page {
    let ext = path.rfind('.').map(|i| path[i..].to_string()).unwrap_or_default();
    let mut data = fields.as_object().cloned().unwrap_or_default();
    let content = crate::renderer::Content::from_record(data.remove("content"));
    let mut page = Page::new(
        PageSrc {
            path: path.to_string(),
            ext,
            created: None,
        },
        PageData::new(content, data),
    );
    if let Some(url) = page.data.url().map(str::to_string) {
        page.set_url(&url);
    }
    page
}

/// Engine that records the files it renders and wraps content in
/// `[name:...]`.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    name: String,
    calls: Mutex<Vec<String>>,
}

impl RecordingEngine {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Filenames rendered so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Engine for RecordingEngine {
    async fn render(
        &self,
        content: &str,
        _data: &Data,
        filename: &str,
        _is_layout: bool,
    ) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(filename.to_string());
        }
        Ok(format!("[{}:{}]", self.name, content))
    }

    fn render_component(&self, content: &str, _data: &Data, _filename: &str) -> Result<String> {
        Ok(format!("[{}:{}]", self.name, content))
    }

    fn add_helper(&self, _name: &str, _helper: Arc<dyn Filter>) {}

    fn delete_cache(&self, _file: &str) {}
}
