//! End-to-end CLI tests for the preserver binary.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_config(dir: &Path, base_url: &str) -> PathBuf {
    let config = format!(
        r#"
[repository]
dir = "{repo}"

[fetch]
retry_count = 1
retry_delay_ms = 10
network_retry_count = 0

[[unit_type]]
key = "journal"
redirect = ["follow", "in_spec"]
result_map = {{ "429" = "handler:retry_after" }}

[[unit]]
unit_type = "journal"
base_url = "{base_url}/"
name = "Test Unit"
params = {{ volume = "1" }}
"#,
        repo = dir.join("repo").display(),
    );
    let path = dir.join("preserver.toml");
    std::fs::write(&path, config).expect("write config");
    path
}

fn preserver(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("preserver").unwrap();
    cmd.arg("--config").arg(config).arg("-q");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("preserver").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fetch, inspect and route"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("preserver").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("preserver"));
}

/// Test that a missing config file causes non-zero exit.
#[test]
fn test_binary_missing_config_returns_error() {
    let dir = TempDir::new().expect("failed to create temp dir");
    preserver(&dir.path().join("absent.toml"))
        .arg("units")
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.toml"));
}

/// Test that an out-of-range config value is reported by field name.
#[test]
fn test_binary_invalid_config_value_returns_error() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[fetch]\nconnect_timeout_secs = 0\n").unwrap();
    preserver(&path)
        .arg("units")
        .assert()
        .failure()
        .stderr(predicate::str::contains("fetch.connect_timeout_secs"));
}

#[test]
fn test_binary_units_lists_configured_unit() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = write_config(dir.path(), "http://journal.example.com");
    preserver(&config)
        .arg("units")
        .assert()
        .success()
        .stdout(predicate::str::contains("Test Unit"))
        .stdout(predicate::str::contains("http://journal.example.com/"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_fetch_list_cat_hash_round() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.html"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b/c.html"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"world".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let config = write_config(dir.path(), &server.uri());
    let a = format!("{}/a.html", server.uri());
    let c = format!("{}/b/c.html", server.uri());

    preserver(&config)
        .args(["fetch", "Test Unit", &a, &c])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("fetched\t{a}")));

    preserver(&config)
        .args(["list", "Test Unit"])
        .assert()
        .success()
        .stdout(predicate::str::contains(a.as_str()))
        .stdout(predicate::str::contains(c.as_str()));

    preserver(&config)
        .args(["cat", &c])
        .assert()
        .success()
        .stdout("world");

    preserver(&config)
        .args(["hash", "Test Unit"])
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[0-9a-f]{64}\t").unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_fetch_failure_returns_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let config = write_config(dir.path(), &server.uri());
    let url = format!("{}/missing.html", server.uri());

    preserver(&config)
        .args(["fetch", "Test Unit", &url])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed"));

    preserver(&config)
        .args(["cat", &url])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no configured unit holds content"));
}
