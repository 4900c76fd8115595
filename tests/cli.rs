use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[product]
name = "pro"

[embedding]
provider = "disabled"

[storage]
backend = "filesystem"
root = "{}/data"
prefix = "pro"
"#,
        root.display()
    );
    let config_path = config_dir.join("rani.toml");
    fs::write(&config_path, config_content).unwrap();

    fs::write(
        root.join("bundle.json"),
        r#"{
  "_VERSION": "8-0",
  "_TOTAL_CHUNKS": 1,
  "_GENERATED": "2025-06-01T12:00:00Z",
  "chunks": [{ "id": "c1", "content": "A filter selects rows." }]
}"#,
    )
    .unwrap();

    (tmp, config_path)
}

fn run_rani(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rani"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("GEMINI_API_KEY")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run rani")
}

#[test]
fn test_versions_lists_catalog() {
    let (_tmp, config) = setup_test_env();
    let output = run_rani(&config, &["versions"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("Resolve Pro (https://help.resolve.io/pro/)"));
    assert!(stdout.contains("8-0 [default, latest]: not loaded"));
    assert!(stdout.contains("7-9: not loaded"));
}

#[test]
fn test_search_on_empty_index() {
    let (_tmp, config) = setup_test_env();
    let output = run_rani(&config, &["search", "filter"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No results."));
}

#[test]
fn test_ingest_with_disabled_encoder_fails() {
    let (tmp, config) = setup_test_env();
    let bundle = tmp.path().join("bundle.json");
    let output = run_rani(&config, &["ingest", bundle.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("encoder"));
    assert!(!tmp.path().join("data/pro/chunks/chunks-8-0.json").exists());
}

#[test]
fn test_ask_requires_api_key() {
    let (_tmp, config) = setup_test_env();
    let output = run_rani(&config, &["ask", "What is a filter?"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("GEMINI_API_KEY"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let output = run_rani(&tmp.path().join("nope.toml"), &["versions"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read config file"));
}
