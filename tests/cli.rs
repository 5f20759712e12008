use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn vetchat_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_vetchat"))
}

fn setup_test_env(backend: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[server]
bind = "127.0.0.1:0"

[store]
backend = "{backend}"
path = "{}/data/vetchat.sqlite"

[llm]
provider = "disabled"

[maintenance]
retention_days = 90
"#,
        root.display()
    );

    let config_path = config_dir.join("vetchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_vetchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = vetchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("JWT_SECRET")
        .env_remove("ENCRYPTION_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run vetchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("sqlite");

    let (stdout, stderr, success) = run_vetchat(&config_path, &["init"]);
    assert!(success, "init failed: {stderr}");
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/vetchat.sqlite").exists());

    // Idempotent
    let (_, stderr, success) = run_vetchat(&config_path, &["init"]);
    assert!(success, "second init failed: {stderr}");
}

#[test]
fn test_init_is_noop_for_memory_backend() {
    let (tmp, config_path) = setup_test_env("memory");
    let (stdout, _, success) = run_vetchat(&config_path, &["init"]);
    assert!(success);
    assert!(stdout.contains("nothing to initialize"));
    assert!(!tmp.path().join("data/vetchat.sqlite").exists());
}

#[test]
fn test_check_reports_store_and_missing_secret() {
    let (_tmp, config_path) = setup_test_env("sqlite");
    let (stdout, stderr, success) = run_vetchat(&config_path, &["check"]);
    assert!(success, "check failed: {stderr}");
    assert!(stdout.contains("Store OK (sqlite)"));
    assert!(stdout.contains("LLM providers: none"));
    assert!(stdout.contains("JWT_SECRET is not set"));
}

#[test]
fn test_cleanup_on_fresh_database() {
    let (_tmp, config_path) = setup_test_env("sqlite");
    run_vetchat(&config_path, &["init"]);

    let (stdout, _, success) = run_vetchat(&config_path, &["cleanup", "--days", "30", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("Dry run"));

    let (stdout, stderr, success) = run_vetchat(&config_path, &["cleanup"]);
    assert!(success, "cleanup failed: {stderr}");
    assert!(stdout.contains("Deleted 0 conversations and 0 messages older than 90 days."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_vetchat(&tmp.path().join("nope.toml"), &["check"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_tier_commands_need_no_config() {
    let missing = Path::new("/nonexistent/vetchat.toml");

    let (stdout, _, success) = run_vetchat(missing, &["tiers"]);
    assert!(success);
    assert!(stdout.contains("free"));
    assert!(stdout.contains("unlimited"));

    let (stdout, _, success) = run_vetchat(missing, &["tier", "Founding Member"]);
    assert!(success);
    assert!(stdout.contains("-> founder"));

    let (stdout, _, success) = run_vetchat(missing, &["tier", "canceled"]);
    assert!(success);
    assert!(stdout.contains("-> free"));
}

#[test]
fn test_mask_command() {
    let missing = Path::new("/nonexistent/vetchat.toml");
    let (stdout, _, success) = run_vetchat(
        missing,
        &["mask", "my ssn is 123-45-6789, email vet@example.com"],
    );
    assert!(success);
    assert!(stdout.contains("[REDACTED_SSN]"));
    assert!(stdout.contains("[REDACTED_EMAIL]"));
    assert!(!stdout.contains("123-45-6789"));
}
