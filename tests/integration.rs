use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn quaff_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_quaff"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("items.json"),
        r#"[{"id": 1, "name": "alpha"}, {"id": 2, "name": "beta"}]"#,
    )
    .unwrap();
    fs::write(
        files_dir.join("feed.xml"),
        "<feed><entry><id>7</id><title>gamma</title></entry></feed>",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/quaff.sqlite"

[transport]
root = "{root}/files"

[apis.local]
service = ["list:*"]
sync_endpoints = ["list:local"]

[endpoints."list:local"]
path = "/items.json"
transport = "file"
model = "Item"

[endpoints."list:feed"]
path = "/feed.xml"
transport = "file"
item_path = "//entry"
model = "Item"

[endpoints."list:missing"]
path = "/nope.json"
transport = "file"
model = "Item"

[models.Item]
fields = ["ExternalId", "Name"]

[models.Item.quaff_map."list:*"]
id = "=ExternalId"
name = "Name"

[models.Item.quaff_map."list:feed"]
id = "=ExternalId"
title = "Name"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("quaff.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_quaff(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = quaff_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run quaff binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_quaff(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/quaff.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, _, ok) = run_quaff(&config, &["init"]);
    assert!(ok);
    let (_, stderr, ok) = run_quaff(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_endpoints_listing() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_quaff(&config, &["endpoints"]);
    assert!(ok, "endpoints failed: {}", stderr);
    assert!(stdout.contains("ALIAS"));
    assert!(stdout.contains("list:local"));
    assert!(stdout.contains("file"));
    assert!(stdout.contains("/items.json"));
}

#[test]
fn test_fetch_prints_items() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_quaff(&config, &["fetch", "list:local"]);
    assert!(ok, "fetch failed: {}", stderr);
    let items: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(items.as_array().unwrap().len(), 2);
    assert_eq!(items[1]["name"], "beta");
}

#[test]
fn test_sync_file_endpoint() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_quaff(&config, &["sync", "list:local", "--quiet"]);
    assert!(ok, "sync failed: {}", stderr);
    assert!(stdout.contains("list:local"));
    assert!(stdout.contains("written=2"));
}

#[test]
fn test_sync_xml_endpoint() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_quaff(&config, &["sync", "list:feed", "--quiet"]);
    assert!(ok, "sync failed: {}", stderr);
    assert!(stdout.contains("written=1"));
}

#[test]
fn test_sync_all_uses_api_defaults() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_quaff(&config, &["sync", "all", "--quiet"]);
    assert!(ok, "sync all failed: {}", stderr);
    assert!(stdout.contains("list:local"));
    assert!(!stdout.contains("list:missing"));
}

#[test]
fn test_sync_missing_file_fails() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_quaff(
        &config,
        &["sync", "list:missing", "list:local", "--quiet"],
    );
    assert!(!ok);
    assert!(stdout.contains("failed"));
    assert!(stdout.contains("written=2"));
    assert!(stderr.contains("did not sync cleanly"));
}

#[test]
fn test_unknown_endpoint() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_quaff(&config, &["fetch", "list:nowhere"]);
    assert!(!ok);
    assert!(stderr.contains("unknown endpoint"));
}

#[test]
fn test_history_after_sync() {
    let (_tmp, config) = setup_test_env();
    run_quaff(&config, &["sync", "list:local", "--quiet"]);
    run_quaff(&config, &["sync", "list:local", "--quiet"]);
    let (stdout, stderr, ok) = run_quaff(&config, &["history"]);
    assert!(ok, "history failed: {}", stderr);
    assert_eq!(stdout.matches("list:local").count(), 2);
}

#[test]
fn test_json_progress() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_quaff(&config, &["sync", "list:local", "--json-progress"]);
    assert!(ok, "sync failed: {}", stderr);
    assert!(stderr.contains(r#""event":"finished""#));
}
