use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dynarag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dynarag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/dynarag.sqlite"

[embedding]
provider = "disabled"

[rate_limit]
enabled = false
"#,
        root.display()
    );

    let config_path = config_dir.join("dynarag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dynarag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dynarag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dynarag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_dynarag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/dynarag.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_dynarag(&config_path, &["init"]);
    let (_, stderr, second) = run_dynarag(&config_path, &["init"]);
    assert!(first);
    assert!(second, "second init failed: {}", stderr);
}

#[test]
fn test_empty_owner_listings() {
    let (_tmp, config_path) = setup_test_env();
    run_dynarag(&config_path, &["init"]);

    let (stdout, stderr, success) = run_dynarag(&config_path, &["--owner", "alice", "list"]);
    assert!(success, "list failed: {}", stderr);
    assert!(stdout.contains("No chunks."));

    let (stdout, _, success) = run_dynarag(&config_path, &["documents"]);
    assert!(success);
    assert!(stdout.contains("No documents."));

    let (stdout, _, success) = run_dynarag(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Chunks:      0"));
}

#[test]
fn test_purge_dry_run_on_empty_owner() {
    let (_tmp, config_path) = setup_test_env();
    run_dynarag(&config_path, &["init"]);

    let (stdout, stderr, success) = run_dynarag(&config_path, &["purge", "--dry-run"]);
    assert!(success, "purge failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("embeddings: 0"));
}

#[test]
fn test_chunk_fails_with_disabled_embedder() {
    let (_tmp, config_path) = setup_test_env();
    run_dynarag(&config_path, &["init"]);

    let (_, stderr, success) = run_dynarag(&config_path, &["chunk", "a.md", "hello"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_metadata_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_dynarag(&config_path, &["init"]);

    let (_, stderr, success) = run_dynarag(&config_path, &["similar", "x", "--metadata", "{"]);
    assert!(!success);
    assert!(stderr.contains("Invalid metadata JSON"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_dynarag(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
