//! Template environment behavior: caching, escaping and error reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use vellum::template::{
    Data, Environment, EnvironmentOptions, FilterContext, LoadedSource, Loader, MemoryLoader, SourceError,
};

use crate::data;

fn environment(files: &[(&str, &str)]) -> Environment {
    let loader = MemoryLoader::new();
    for (path, source) in files {
        loader.insert(path, *source);
    }
    Environment::new(Arc::new(loader))
}

#[tokio::test]
async fn test_load_compiles_once_per_path() {
    let env = environment(&[("/_includes/card.vto", "<p>{{ title }}</p>")]);

    let first = env.load("card.vto", None).await.unwrap();
    let second = env.load("card.vto", None).await.unwrap();
    let with_query = env.load("/_includes/card.vto?v=2", None).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &with_query));
    assert_eq!(env.cache_len(), 1);

    env.delete_cache("/_includes/card.vto");
    let reloaded = env.load("card.vto", None).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &reloaded));
}

/// Yields before every load so concurrent callers interleave on the cache.
struct YieldingLoader {
    inner: MemoryLoader,
    calls: AtomicUsize,
}

#[async_trait]
impl Loader for YieldingLoader {
    fn resolve(&self, from: &str, file: &str) -> String {
        self.inner.resolve(from, file)
    }

    async fn load(&self, path: &str) -> anyhow::Result<LoadedSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.inner.load(path).await
    }
}

#[tokio::test]
async fn test_concurrent_loads_share_one_artifact() {
    let inner = MemoryLoader::new();
    inner.insert("/_includes/shared.vto", "{{ 1 + 1 }}");
    let loader = Arc::new(YieldingLoader {
        inner,
        calls: AtomicUsize::new(0),
    });
    let env = Environment::new(Arc::clone(&loader) as Arc<dyn Loader>);

    let templates = join_all((0..8).map(|_| env.load("shared.vto", None))).await;
    let templates: Vec<_> = templates.into_iter().map(Result::unwrap).collect();

    assert!(loader.calls.load(Ordering::SeqCst) > 1, "loads did not overlap");
    assert_eq!(env.cache_len(), 1);
    assert!(templates.iter().all(|t| Arc::ptr_eq(t, &templates[0])));
}

#[tokio::test]
async fn test_frontmatter_becomes_defaults() {
    let env = environment(&[("/_includes/card.vto", "---\ntitle: Default\n---\n<p>{{ title }}</p>")]);

    let result = env.run("card.vto", Data::new(), None).await.unwrap();
    assert_eq!(result.content, "<p>Default</p>");

    let result = env.run("card.vto", data(json!({"title": "Given"})), None).await.unwrap();
    assert_eq!(result.content, "<p>Given</p>");
}

#[tokio::test]
async fn test_autoescape_and_safe() {
    let options = EnvironmentOptions {
        autoescape: true,
        ..EnvironmentOptions::default()
    };
    let env = Environment::with_options(Arc::new(MemoryLoader::new()), options);
    let input = data(json!({"html": "<b>hi</b>"}));

    let escaped = env.run_string("{{ html }}", input.clone(), None).await.unwrap();
    assert_eq!(escaped.content, "&lt;b&gt;hi&lt;/b&gt;");

    let raw = env.run_string("{{ html |> safe }}", input.clone(), None).await.unwrap();
    assert_eq!(raw.content, "<b>hi</b>");

    let plain = Environment::new(Arc::new(MemoryLoader::new()));
    let unescaped = plain.run_string("{{ html }}", input, None).await.unwrap();
    assert_eq!(unescaped.content, "<b>hi</b>");
}

#[tokio::test]
async fn test_registered_filter_takes_precedence() {
    let env = Environment::new(Arc::new(MemoryLoader::new()));
    env.add_filter_fn("shout", |_ctx: &FilterContext<'_>, value: Value, args: &[Value]| {
        let suffix = args.first().and_then(Value::as_str).unwrap_or("!");
        Ok(Value::String(format!("{}{suffix}", value.as_str().unwrap_or_default())))
    });

    let result = env
        .run_string("{{ name |> shout }} {{ name |> shout(\"?\") }}", data(json!({"name": "hey"})), None)
        .await
        .unwrap();
    assert_eq!(result.content, "hey! hey?");
}

#[tokio::test]
async fn test_runtime_error_reports_line() {
    let env = Environment::new(Arc::new(MemoryLoader::new()));
    let err = env
        .run_string("<h1>ok</h1>\n{{ missing.field }}", Data::new(), Some("/page.vto"))
        .await
        .unwrap_err();

    let located = err.downcast_ref::<SourceError>().expect("located error");
    assert_eq!(located.path, "/page.vto");
    assert_eq!(located.line, 2);
    assert!(err.to_string().starts_with("Error in the template /page.vto:2:"), "{err}");
    assert!(env.cached("/page.vto").is_some());
}

#[tokio::test]
async fn test_compile_error_is_not_cached() {
    let env = Environment::new(Arc::new(MemoryLoader::new()));
    let err = env.run_string("{{ if x }}open", Data::new(), Some("/broken.vto")).await.unwrap_err();

    assert!(err.downcast_ref::<SourceError>().is_some(), "{err:#}");
    assert!(env.cached("/broken.vto").is_none());
}

#[tokio::test]
async fn test_whitespace_control() {
    let env = Environment::new(Arc::new(MemoryLoader::new()));
    let result = env.run_string("a  {{- 1 -}}  b", Data::new(), None).await.unwrap();
    assert_eq!(result.content, "a1b");
}

#[tokio::test]
async fn test_exports_are_returned() {
    let env = Environment::new(Arc::new(MemoryLoader::new()));
    let result = env
        .run_string("{{ export title = \"Hello\" }}{{ set hidden = 1 }}{{ title }}", Data::new(), None)
        .await
        .unwrap();

    assert_eq!(result.content, "Hello");
    assert_eq!(result.exports.get("title"), Some(&json!("Hello")));
    assert!(!result.exports.contains_key("hidden"));
}
