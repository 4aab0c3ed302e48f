//! Template engines: per-format renderers used by the [`Renderer`](super::Renderer).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::markdown;
use crate::template::{Data, Environment, Filter};

/// Renders the content of one format.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Render `content` with `data`. `filename` identifies the source for
    /// caching and error messages.
    async fn render(
        &self,
        content: &str,
        data: &Data,
        filename: &str,
        is_layout: bool,
    ) -> Result<String>;

    /// Render synchronously, for components embedded in other templates.
    fn render_component(&self, content: &str, data: &Data, filename: &str) -> Result<String>;

    /// Make `helper` available to the templates of this engine.
    fn add_helper(&self, name: &str, helper: Arc<dyn Filter>);

    /// Drop any compiled state kept for `file`.
    fn delete_cache(&self, file: &str);

    /// Directory layouts and includes of this engine are resolved against.
    fn includes(&self) -> Option<&str> {
        None
    }
}

/// Engine backed by a template [`Environment`].
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    env: Arc<Environment>,
    includes: String,
}

impl TemplateEngine {
    pub fn new(env: Arc<Environment>, includes: impl Into<String>) -> Self {
        Self {
            env,
            includes: includes.into(),
        }
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }
}

#[async_trait]
impl Engine for TemplateEngine {
    async fn render(
        &self,
        content: &str,
        data: &Data,
        filename: &str,
        _is_layout: bool,
    ) -> Result<String> {
        let result = self.env.run_string(content, data.clone(), Some(filename)).await?;
        Ok(result.content)
    }

    fn render_component(&self, content: &str, data: &Data, _filename: &str) -> Result<String> {
        Ok(self.env.run_string_sync(content, data.clone())?.content)
    }

    fn add_helper(&self, name: &str, helper: Arc<dyn Filter>) {
        self.env.add_filter(name, helper);
    }

    fn delete_cache(&self, file: &str) {
        self.env.delete_cache(file);
    }

    fn includes(&self) -> Option<&str> {
        Some(&self.includes)
    }
}

/// CommonMark to HTML.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownEngine;

#[async_trait]
impl Engine for MarkdownEngine {
    async fn render(
        &self,
        content: &str,
        _data: &Data,
        _filename: &str,
        _is_layout: bool,
    ) -> Result<String> {
        Ok(markdown::to_html(content))
    }

    fn render_component(&self, content: &str, _data: &Data, _filename: &str) -> Result<String> {
        Ok(markdown::to_html(content))
    }

    fn add_helper(&self, _name: &str, _helper: Arc<dyn Filter>) {}

    fn delete_cache(&self, _file: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::MemoryLoader;
    use serde_json::json;

    fn engine() -> TemplateEngine {
        TemplateEngine::new(Arc::new(Environment::new(Arc::new(MemoryLoader::new()))), "/_includes")
    }

    #[tokio::test]
    async fn test_template_engine_caches_by_filename() {
        let engine = engine();
        let data = json!({"n": 2}).as_object().cloned().unwrap();
        let output = engine.render("{{ n * 2 }}", &data, "/page.vto", false).await.unwrap();
        assert_eq!(output, "4");
        assert!(engine.environment().cached("/page.vto").is_some());

        engine.delete_cache("/page.vto");
        assert!(engine.environment().cached("/page.vto").is_none());
    }

    #[test]
    fn test_helpers_become_filters() {
        let engine = engine();
        engine.add_helper(
            "shout",
            Arc::new(crate::template::FnFilter(|_: &crate::template::FilterContext<'_>, value: serde_json::Value, _: &[serde_json::Value]| {
                Ok(serde_json::Value::String(format!("{}!", value.as_str().unwrap_or_default())))
            })),
        );
        let output = engine.render_component("{{ word |> shout }}", &json!({"word": "hey"}).as_object().cloned().unwrap(), "c").unwrap();
        assert_eq!(output, "hey!");
    }

    #[tokio::test]
    async fn test_markdown_engine() {
        let output = MarkdownEngine.render("*hi*", &Data::new(), "/a.md", false).await.unwrap();
        assert_eq!(output, "<p><em>hi</em></p>\n");
        assert!(MarkdownEngine.includes().is_none());
    }
}
