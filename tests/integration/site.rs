//! Site builds written to disk.

use tempfile::TempDir;
use tokio::fs;
use vellum::config::SiteConfig;
use vellum::site::Site;

async fn write(root: &std::path::Path, path: &str, content: &str) {
    let target = root.join(path);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await.unwrap();
    }
    fs::write(target, content).await.unwrap();
}

#[tokio::test]
async fn test_build_writes_pages_layouts_and_assets() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dest = temp.path().join("public");

    write(&src, "_includes/base.vto", "<html><body>{{ content }}</body></html>").await;
    write(&src, "index.vto", "---\nlayout: base.vto\ntitle: Home\n---\n<h1>{{ title }}</h1>").await;
    write(&src, "about.md", "---\nlayout: base.vto\n---\n# About").await;
    write(&src, "blog/index.vto", "{{ for n of 2 }}<i>{{ n }}</i>{{ /for }}").await;
    write(&src, "css/style.css", "body { margin: 0 }").await;
    write(&src, "_drafts/wip.vto", "{{ broken").await;

    let site = Site::new(SiteConfig {
        src: src.clone(),
        dest: dest.clone(),
        ..SiteConfig::default()
    });
    let summary = site.build().await.unwrap();
    assert_eq!(summary.written, 4);
    assert!(summary.on_demand.is_empty());

    let index = fs::read_to_string(dest.join("index.html")).await.unwrap();
    assert!(index.starts_with("<!DOCTYPE html>\n<html><body>"), "{index}");
    assert!(index.contains("<h1>Home</h1>"), "{index}");

    let about = fs::read_to_string(dest.join("about/index.html")).await.unwrap();
    assert!(about.contains("<h1>About</h1>"), "{about}");

    let blog = fs::read_to_string(dest.join("blog/index.html")).await.unwrap();
    assert_eq!(blog, "<!DOCTYPE html>\n<i>1</i><i>2</i>");

    let css = fs::read_to_string(dest.join("css/style.css")).await.unwrap();
    assert_eq!(css, "body { margin: 0 }");
    assert!(!dest.join("_drafts").exists());
}

#[tokio::test]
async fn test_build_without_pretty_urls() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().to_path_buf();
    write(&src, "about.vto", "about").await;

    let config = SiteConfig {
        src: src.clone(),
        dest: src.join("_site"),
        pretty_urls: false,
        ..SiteConfig::default()
    };
    Site::new(config).build().await.unwrap();

    let about = fs::read_to_string(src.join("_site/about.html")).await.unwrap();
    assert_eq!(about, "<!DOCTYPE html>\nabout");
}

#[tokio::test]
async fn test_build_reports_failing_page() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().to_path_buf();
    write(&src, "bad.vto", "ok\n{{ nothing.here }}").await;

    let err = Site::new(SiteConfig {
        src: src.clone(),
        dest: src.join("_site"),
        ..SiteConfig::default()
    })
    .build()
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Error rendering the page /bad.vto");
    assert!(format!("{err:#}").contains("/bad.vto:2:"), "{err:#}");
}
