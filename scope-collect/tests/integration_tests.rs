//! Integration tests for scope-collect CLI
//!
//! None of these reach the network: they cover argument handling, the
//! snapshot import path and the credential checks that run before any request.

use assert_cmd::Command;
use libthreadscope::secrets::{generate_key, Credentials, SecretStore};
use predicates::prelude::*;
use serde_json::json;
use std::path::PathBuf;
use tempfile::TempDir;

struct TestEnv {
    temp_dir: TempDir,
    data_dir: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        Self { temp_dir, data_dir }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("scope-collect").unwrap();
        cmd.current_dir(self.temp_dir.path());
        cmd.env("THREADSCOPE_CONFIG", self.temp_dir.path().join("config.toml"));
        cmd.env("CRYPTO_KEY_PATH", self.temp_dir.path().join("crypto.key"));
        cmd.env("CREDENTIALS_PATH", self.temp_dir.path().join("credentials.enc"));
        cmd.env("THREADSCOPE_DATA_DIR", &self.data_dir);
        cmd
    }

    /// Key plus sealed credentials, as `scope-creds keygen` and `setup` leave them
    fn seal_credentials(&self) {
        let key_path = self.temp_dir.path().join("crypto.key");
        let blob_path = self.temp_dir.path().join("credentials.enc");
        generate_key(&key_path, false).unwrap();

        let credentials = Credentials::from_value(json!({
            "threads_token": "THQWJ-test-token",
            "spreadsheet_id": "1AbCdEfGh",
            "google_credentials": {"type": "service_account"}
        }))
        .unwrap();
        SecretStore::open(&key_path, &blob_path)
            .unwrap()
            .seal_and_store(&credentials)
            .unwrap();
    }

    /// Point the client at a closed local port so every request fails
    fn write_unreachable_api_config(&self) {
        std::fs::write(
            self.temp_dir.path().join("config.toml"),
            "[api]\nbase_url = \"http://127.0.0.1:9\"\nrequest_delay = \"0ms\"\ntimeout = \"2s\"\n",
        )
        .unwrap();
    }

    fn error_log(&self) -> Option<String> {
        let logs = self.data_dir.join("logs");
        let entry = std::fs::read_dir(logs).ok()?.flatten().next()?;
        std::fs::read_to_string(entry.path()).ok()
    }

    fn write_snapshot(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn snapshot() -> String {
    json!([
        {
            "post_id": "101",
            "shortcode": "C1",
            "post_date": "2024-05-01T08:00:00+0800",
            "content": "first, with a comma",
            "is_quote": false,
            "media_type": "TEXT_POST",
            "permalink": "https://www.threads.net/@me/post/C1",
            "views": 100, "likes": 10, "replies": 1, "reposts": 0, "quotes": 0, "shares": 1
        },
        {
            "post_id": "102",
            "shortcode": "C2",
            "post_date": "2024-05-03T08:00:00+0800",
            "content": "second",
            "is_quote": true,
            "media_type": "IMAGE",
            "permalink": "https://www.threads.net/@me/post/C2",
            "views": 0, "likes": 0, "replies": 0, "reposts": 0, "quotes": 0, "shares": 0
        }
    ])
    .to_string()
}

#[test]
fn test_from_json_writes_csv_backup() {
    let env = TestEnv::new();
    let input = env.write_snapshot("posts.json", &snapshot());

    env.cmd()
        .arg("--from-json")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 posts"));

    let csv = std::fs::read_to_string(env.data_dir.join("threads_data.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert!(lines[0].starts_with("post_id,shortcode,post_date"));
    assert!(lines[0].ends_with("engagement,engagement_rate"));
    assert!(lines[1].starts_with("102,"), "Newest post first");
    assert!(lines[2].contains("\"first, with a comma\""));
    assert!(lines[2].ends_with(",12,0.12"));
}

#[test]
fn test_from_json_merges_into_existing_backup() {
    let env = TestEnv::new();
    let input = env.write_snapshot("posts.json", &snapshot());
    env.cmd().arg("--from-json").arg(&input).assert().success();

    let update = env.write_snapshot(
        "update.json",
        &json!([{
            "post_id": "101",
            "post_date": "2024-05-01T08:00:00+0800",
            "views": 500, "likes": 50
        }])
        .to_string(),
    );
    env.cmd().arg("--from-json").arg(&update).assert().success();

    let csv = std::fs::read_to_string(env.data_dir.join("threads_data.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3, "Header plus one row per post");
    assert!(csv.contains(",500,50,"));
}

#[test]
fn test_from_json_rejects_invalid_file() {
    let env = TestEnv::new();
    let input = env.write_snapshot("broken.json", "{ not json");

    env.cmd()
        .arg("--from-json")
        .arg(&input)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid JSON snapshot"));
}

#[test]
fn test_from_json_conflicts_with_skip_export() {
    let env = TestEnv::new();
    let input = env.write_snapshot("posts.json", &snapshot());

    env.cmd()
        .arg("--from-json")
        .arg(&input)
        .arg("--skip-export")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_missing_key_fails_before_collecting() {
    let env = TestEnv::new();

    env.cmd()
        .args(["--mode", "test", "--limit", "5"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Encryption key file not found"));

    assert!(!env.data_dir.join("posts.json").exists());

    let log = env.error_log().expect("error log written");
    assert!(log.contains("Encryption key file not found"));
}

#[test]
fn test_failed_listing_keeps_previous_snapshot() {
    let env = TestEnv::new();
    env.seal_credentials();
    env.write_unreachable_api_config();

    std::fs::create_dir_all(&env.data_dir).unwrap();
    let snapshot_path = env.data_dir.join("posts.json");
    std::fs::write(&snapshot_path, snapshot()).unwrap();

    env.cmd()
        .args(["--mode", "force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No posts to process"));

    assert_eq!(std::fs::read_to_string(&snapshot_path).unwrap(), snapshot());
    assert!(!env.data_dir.join("threads_data.csv").exists());
}

#[test]
fn test_zero_limit_is_invalid_input() {
    let env = TestEnv::new();

    env.cmd()
        .args(["--mode", "test", "--limit", "0"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("--limit must be greater than zero"));
}

#[test]
fn test_unknown_mode_is_rejected() {
    let env = TestEnv::new();

    env.cmd()
        .args(["--mode", "everything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'everything'"));
}

#[test]
fn test_invalid_timezone_in_config() {
    let env = TestEnv::new();
    std::fs::write(
        env.temp_dir.path().join("config.toml"),
        "[output]\ntimezone = \"Mars/Olympus\"\n",
    )
    .unwrap();

    env.cmd()
        .args(["--mode", "force"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("output.timezone"));
}
