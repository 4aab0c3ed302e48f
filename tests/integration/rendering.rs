//! Rendering pipeline: render order, generators, layouts and engines.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use vellum::core::VellumError;
use vellum::renderer::{
    Content, Engine, Format, Formats, Generator, MarkdownEngine, Page, PagePreprocessor, RenderedContent,
    Renderer, RendererOptions, TemplateEngine,
};
use vellum::template::{Data, Environment, Loader, MemoryLoader, SourceError};
use vellum::test_utils::{RecordingEngine, page};

use crate::data;

fn renderer_with(loader: MemoryLoader) -> Renderer {
    renderer_and_env(loader).1
}

fn renderer_and_env(loader: MemoryLoader) -> (Arc<Environment>, Renderer) {
    let loader: Arc<dyn Loader> = Arc::new(loader);
    let env = Arc::new(Environment::new(Arc::clone(&loader)));
    let template: Arc<dyn Engine> = Arc::new(TemplateEngine::new(Arc::clone(&env), "/_includes"));
    let markdown: Arc<dyn Engine> = Arc::new(MarkdownEngine);

    let mut formats = Formats::new();
    formats.set(Format::page(".vto", vec![Arc::clone(&template)]));
    formats.set(Format::page(".md", vec![template, markdown]));
    formats.set(Format::asset(".css"));
    (env, Renderer::new(Arc::new(formats), loader, RendererOptions::default()))
}

fn recording_renderer(engines: &[(&str, Arc<RecordingEngine>)]) -> Renderer {
    let mut formats = Formats::new();
    for (ext, engine) in engines {
        let engine: Arc<dyn Engine> = engine.clone();
        formats.set(Format::page(*ext, vec![engine]));
    }
    Renderer::new(Arc::new(formats), Arc::new(MemoryLoader::new()), RendererOptions::default())
}

async fn render(renderer: &Renderer, pages: Vec<Page>) -> Result<(Vec<Page>, Vec<Page>)> {
    let mut rendered = Vec::new();
    let mut on_demand = Vec::new();
    renderer.render_pages(pages, &mut rendered, &mut on_demand).await?;
    Ok((rendered, on_demand))
}

fn text(page: &Page) -> &str {
    page.content.as_ref().and_then(RenderedContent::as_text).unwrap_or_default()
}

fn find_error<'a, T: std::error::Error + 'static>(err: &'a anyhow::Error) -> Option<&'a T> {
    err.chain().find_map(|cause| cause.downcast_ref::<T>())
}

#[tokio::test]
async fn test_nested_layouts_compose_outward() {
    let loader = MemoryLoader::new();
    loader.insert("/_includes/a.vto", "---\nlayout: b.vto\ntitle: Layout\n---\n<a>{{ content }}</a>");
    loader.insert("/_includes/b.vto", "<b title=\"{{ title }}\">{{ content }}</b>");
    let renderer = renderer_with(loader);

    let pages = vec![page("/p.vto", json!({"url": "/p/", "layout": "a.vto", "title": "Page", "content": "PAGE"}))];
    let (rendered, _) = render(&renderer, pages).await.unwrap();

    let output = text(&rendered[0]);
    assert!(output.starts_with("<!DOCTYPE html>\n"), "{output}");
    assert!(output.contains("<b title=\"Page\"><a>PAGE</a></b>"), "{output}");
    assert_eq!(rendered[0].output_path.as_deref(), Some("/p/index.html"));
}

#[tokio::test]
async fn test_layout_tag_keeps_frontmatter_after_page_layout() {
    let loader = MemoryLoader::new();
    loader.insert("/_includes/base.vto", "---\nbrand: ACME\n---\n[{{ brand }}|{{ content }}]");
    loader.insert("/wrap.vto", "{{ layout \"base.vto\" }}inner{{ /layout }}");
    let (env, renderer) = renderer_and_env(loader);

    let pages = vec![page("/p.vto", json!({"url": "/p.txt", "layout": "base.vto", "content": "P"}))];
    let (rendered, _) = render(&renderer, pages).await.unwrap();
    assert_eq!(text(&rendered[0]), "[ACME|P]");

    let result = env.run("/wrap.vto", Data::new(), None).await.unwrap();
    assert_eq!(result.content, "[ACME|inner]");
}

#[tokio::test]
async fn test_doctype_only_for_html_without_one() {
    let renderer = renderer_with(MemoryLoader::new());
    let pages = vec![
        page("/a.vto", json!({"url": "/a/", "content": "<!doctype html><p>a</p>"})),
        page("/feed.vto", json!({"url": "/feed.xml", "content": "<feed/>"})),
        page("/b.vto", json!({"url": "/b.html", "content": "<p>b</p>"})),
    ];
    let (rendered, _) = render(&renderer, pages).await.unwrap();

    assert_eq!(text(&rendered[0]), "<!doctype html><p>a</p>");
    assert_eq!(text(&rendered[1]), "<feed/>");
    assert_eq!(text(&rendered[2]), "<!DOCTYPE html>\n<p>b</p>");
}

#[tokio::test]
async fn test_generator_pages_follow_record_order() {
    let renderer = renderer_with(MemoryLoader::new());

    let mut generator = page("/gen.vto", json!({"title": "Parent", "layout": "none.vto"}));
    generator.data.content = Some(Content::Generator(Generator::from_iter(|parent: Data| {
        let title = parent.get("title").cloned().unwrap_or(Value::Null);
        vec![
            data(json!({"url": "/1", "content": "one {{ title }}", "layout": null, "seen": title})),
            data(json!({"content": "no url"})),
            data(json!({"url": "/2", "title": "two", "content": "{{ title }}", "layout": null})),
        ]
    })));
    let plain = page("/plain.vto", json!({"content": "plain"}));

    let (rendered, on_demand) = render(&renderer, vec![generator, plain]).await.unwrap();

    assert!(on_demand.is_empty());
    let urls: Vec<Option<&str>> = rendered.iter().map(|p| p.data.url()).collect();
    assert_eq!(urls, vec![None, Some("/1"), Some("/2")]);
    assert_eq!(text(&rendered[0]), "plain");
    assert_eq!(text(&rendered[1]), "one Parent");
    assert_eq!(text(&rendered[2]), "two");
    assert_eq!(rendered[1].data.get("seen"), Some(&json!("Parent")));
    assert_eq!(rendered[1].index, 0);
    assert_eq!(rendered[2].index, 2);
}

#[tokio::test]
async fn test_render_order_groups_run_in_sequence() {
    let engine = RecordingEngine::new("txt");
    let renderer = recording_renderer(&[(".txt", Arc::clone(&engine))]);

    let pages = vec![
        page("/a.txt", json!({"renderOrder": 1, "content": "a"})),
        page("/b.txt", json!({"content": "b"})),
        page("/c.txt", json!({"renderOrder": -1, "content": "c"})),
        page("/d.txt", json!({"renderOrder": "last", "content": "d"})),
        page("/e.txt", json!({"renderOrder": 1, "content": "e"})),
    ];
    let (rendered, _) = render(&renderer, pages).await.unwrap();

    assert_eq!(engine.calls(), vec!["/c.txt", "/b.txt", "/a.txt", "/e.txt", "/d.txt"]);
    let order: Vec<&str> = rendered.iter().map(Page::source_path).collect();
    assert_eq!(order, vec!["/c.txt", "/b.txt", "/a.txt", "/e.txt", "/d.txt"]);
    assert_eq!(text(&rendered[0]), "[txt:c]");
}

#[tokio::test]
async fn test_template_engine_field_chains_engines() {
    let one = RecordingEngine::new("one");
    let two = RecordingEngine::new("two");
    let renderer = recording_renderer(&[(".one", one), (".two", two)]);

    let pages = vec![
        page("/x.txt", json!({"templateEngine": "one, two", "content": "x"})),
        page("/y.txt", json!({"templateEngine": ["two", "one"], "content": "y"})),
        page("/z.txt", json!({"content": "z"})),
    ];
    let (rendered, _) = render(&renderer, pages).await.unwrap();

    assert_eq!(text(&rendered[0]), "[two:[one:x]]");
    assert_eq!(text(&rendered[1]), "[one:[two:y]]");
    assert_eq!(text(&rendered[2]), "z");
}

#[tokio::test]
async fn test_markdown_format_chains_template_then_markdown() {
    let renderer = renderer_with(MemoryLoader::new());
    let pages = vec![page("/post.md", json!({"title": "Hi", "content": "# {{ title }}"}))];
    let (rendered, _) = render(&renderer, pages).await.unwrap();
    assert_eq!(text(&rendered[0]), "<h1>Hi</h1>\n");
}

#[tokio::test]
async fn test_unknown_template_engine_fails() {
    let renderer = renderer_with(MemoryLoader::new());
    let pages = vec![page("/x.vto", json!({"templateEngine": "nope", "content": "x"}))];
    let err = render(&renderer, pages).await.unwrap_err();

    assert!(matches!(err.downcast_ref::<VellumError>(), Some(VellumError::PageRender { path, .. }) if path == "/x.vto"));
    let unknown = err
        .chain()
        .filter_map(|c| c.downcast_ref::<VellumError>())
        .any(|e| matches!(e, VellumError::UnknownTemplateEngine { name, .. } if name == "nope"));
    assert!(unknown, "{err:#}");
}

#[tokio::test]
async fn test_layout_cycle_is_reported() {
    let loader = MemoryLoader::new();
    loader.insert("/_includes/a.vto", "---\nlayout: b.vto\n---\n{{ content }}");
    loader.insert("/_includes/b.vto", "---\nlayout: a.vto\n---\n{{ content }}");
    let renderer = renderer_with(loader);

    let pages = vec![page("/p.vto", json!({"layout": "a.vto", "content": "x"}))];
    let err = render(&renderer, pages).await.unwrap_err();

    assert!(matches!(err.downcast_ref::<VellumError>(), Some(VellumError::LayoutRender { .. })));
    let cycle = err
        .chain()
        .filter_map(|c| c.downcast_ref::<VellumError>())
        .find_map(|e| match e {
            VellumError::LayoutCycle { chain } => Some(chain.clone()),
            _ => None,
        })
        .expect("layout cycle error");
    assert_eq!(cycle, vec!["/_includes/a.vto", "/_includes/b.vto", "/_includes/a.vto"]);
}

#[tokio::test]
async fn test_missing_layout_is_reported() {
    let renderer = renderer_with(MemoryLoader::new());
    let pages = vec![page("/p.vto", json!({"layout": "missing.vto", "content": "x"}))];
    let err = render(&renderer, pages).await.unwrap_err();

    let missing = err
        .chain()
        .filter_map(|c| c.downcast_ref::<VellumError>())
        .any(|e| matches!(e, VellumError::LayoutNotFound { path, .. } if path == "/_includes/missing.vto"));
    assert!(missing, "{err:#}");
}

#[tokio::test]
async fn test_page_error_keeps_template_location() {
    let renderer = renderer_with(MemoryLoader::new());
    let pages = vec![page("/broken.vto", json!({"content": "fine\n{{ missing.field }}"}))];
    let err = render(&renderer, pages).await.unwrap_err();

    assert!(err.to_string().contains("/broken.vto"));
    let located = find_error::<SourceError>(&err).expect("located error");
    assert_eq!(located.line, 2);
    assert_eq!(located.path, "/broken.vto");
}

#[tokio::test]
async fn test_on_demand_pages_are_deferred() {
    let renderer = renderer_with(MemoryLoader::new());
    let pages = vec![
        page("/now.vto", json!({"content": "now"})),
        page("/later.vto", json!({"ondemand": true, "url": "/later/", "content": "{{ 1 + 2 }}"})),
    ];
    let (rendered, mut on_demand) = render(&renderer, pages).await.unwrap();

    assert_eq!(rendered.len(), 1);
    assert_eq!(on_demand.len(), 1);
    assert!(on_demand[0].content.is_none());

    renderer.render_page_on_demand(&mut on_demand[0]).await.unwrap();
    assert_eq!(text(&on_demand[0]), "<!DOCTYPE html>\n3");
}

#[tokio::test]
async fn test_generator_cannot_render_on_demand() {
    let renderer = renderer_with(MemoryLoader::new());
    let mut generator = page("/gen.vto", json!({}));
    generator.data.content = Some(Content::Generator(Generator::from_iter(|_: Data| Vec::<Data>::new())));

    let err = renderer.render_page_on_demand(&mut generator).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<VellumError>(), Some(VellumError::GeneratorOnDemand { .. })));
}

#[tokio::test]
async fn test_on_demand_asset_is_copied() {
    let renderer = renderer_with(MemoryLoader::new());
    let mut asset = page("/style.css", json!({"url": "/style.css"}));
    asset.data.content = Some(Content::Bytes(b"body {}".to_vec()));

    renderer.render_page_on_demand(&mut asset).await.unwrap();
    assert_eq!(asset.content, Some(RenderedContent::Bytes(b"body {}".to_vec())));
}

#[tokio::test]
async fn test_preprocessors_run_before_rendering() {
    let mut renderer = renderer_with(MemoryLoader::new());
    renderer.preprocessors_mut().set(
        Arc::new(PagePreprocessor(|page: &mut Page| -> Result<()> {
            page.data.fields.insert("title".to_string(), json!("from hook"));
            Ok(())
        })),
        Some(vec![".vto".to_string()]),
    );

    let pages = vec![page("/a.vto", json!({"content": "{{ title }}"})), page("/b.md", json!({"content": "{{ title }}"}))];
    let (rendered, _) = render(&renderer, pages).await.unwrap();

    assert_eq!(text(&rendered[0]), "from hook");
    assert_eq!(text(&rendered[1]), "");
}
