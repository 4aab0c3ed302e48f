//! The `vellum` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use tokio::fs;

#[tokio::test]
async fn test_run_renders_template_to_stdout() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("hello.vto"), "---\ngreeting: Hello\n---\n{{ greeting }} {{ name |> upper }}")
        .await
        .unwrap();

    let mut cmd = Command::cargo_bin("vellum").unwrap();
    cmd.current_dir(temp.path())
        .args(["run", "hello.vto", "--data", r#"{"name": "world"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello WORLD"));
}

#[tokio::test]
async fn test_run_missing_file_fails() {
    let temp = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("vellum").unwrap();
    cmd.current_dir(temp.path())
        .args(["run", "missing.vto"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.vto"));
}

#[tokio::test]
async fn test_build_uses_config_file() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("pages")).await.unwrap();
    fs::write(root.join("pages/index.vto"), "{{ \"<b>\" }}").await.unwrap();
    fs::write(root.join("vellum.toml"), "src = \"pages\"\ndest = \"out\"\nautoescape = true\n").await.unwrap();

    let mut cmd = Command::cargo_bin("vellum").unwrap();
    cmd.current_dir(root)
        .args(["--quiet", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Built 1 pages"));

    let index = fs::read_to_string(root.join("out/index.html")).await.unwrap();
    assert_eq!(index, "<!DOCTYPE html>\n&lt;b&gt;");
}

#[test]
fn test_invalid_config_is_reported() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("vellum.toml"), "src = ").unwrap();

    let mut cmd = Command::cargo_bin("vellum").unwrap();
    cmd.current_dir(temp.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration file"));
}
