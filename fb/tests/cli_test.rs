//! Tests for the `fb` binary

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `fb` with its logs and config lookups confined to `dir`
fn fb(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fb").expect("fb binary not built");
    cmd.current_dir(dir)
        .env("XDG_DATA_HOME", dir.join("data"))
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env("NO_COLOR", "1")
        .env_remove("FLEETBUS_WORKER_NAME")
        .env_remove("FLEETBUS_SEND_PORT")
        .env_remove("FLEETBUS_RECV_PORT");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("fleetbus.yml");
    std::fs::write(&path, body).expect("Failed to write config");
    path
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    fb(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("worker"))
        .stdout(predicate::str::contains("demo"));
}

#[test]
fn test_demo_in_process() {
    let dir = TempDir::new().unwrap();
    fb(dir.path())
        .args(["demo", "--workers", "2", "--send-port", "0", "--recv-port", "0"])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("worker1 add(1, 10) = 11"))
        .stdout(predicate::str::contains("worker2 add(2, 20) = 22"))
        .stdout(predicate::str::contains("2 workers closed"));
}

#[test]
fn test_demo_with_subprocess_workers() {
    let dir = TempDir::new().unwrap();
    let exe = assert_cmd::cargo::cargo_bin("fb");
    fb(dir.path())
        .args(["demo", "--workers", "2", "--send-port", "0", "--recv-port", "0", "--external"])
        .arg(&exe)
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("worker1 add(1, 10) = 11"))
        .stdout(predicate::str::contains("worker2 add(2, 20) = 22"));

    // Every process wrote its own log file
    let logs = dir.path().join("data").join("fleetbus").join("logs");
    for name in ["main", "worker1", "worker2"] {
        assert!(logs.join(format!("{}.log", name)).exists(), "missing {}.log", name);
    }
}

#[test]
fn test_log_dir_from_config() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("custom-logs");
    let config = write_config(
        dir.path(),
        &format!("log:\n  level: debug\n  dir: {}\n", log_dir.display()),
    );
    fb(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["demo", "--workers", "1", "--send-port", "0", "--recv-port", "0"])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success();

    let log = std::fs::read_to_string(log_dir.join("main.log")).unwrap();
    assert!(log.contains("Start of main log"));
}

#[test]
fn test_broken_local_config_is_logged() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".fleetbus.yml"), "bus: [").unwrap();

    // The user config is still found after the broken project-local one
    let log_dir = dir.path().join("user-logs");
    let user_config = dir.path().join("config").join("fleetbus");
    std::fs::create_dir_all(&user_config).unwrap();
    std::fs::write(
        user_config.join("fleetbus.yml"),
        format!("log:\n  dir: {}\n", log_dir.display()),
    )
    .unwrap();

    fb(dir.path())
        .args(["demo", "--workers", "1", "--send-port", "0", "--recv-port", "0"])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success();

    let log = std::fs::read_to_string(log_dir.join("main.log")).unwrap();
    assert!(log.contains("Failed to load config from .fleetbus.yml"));
}

#[test]
fn test_worker_without_broker_fails() {
    let dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = write_config(dir.path(), "bus:\n  connect-timeout-ms: 100\n");
    fb(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["worker", "--name", "w1"])
        .env("FLEETBUS_SEND_PORT", port.to_string())
        .env("FLEETBUS_RECV_PORT", port.to_string())
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to connect to broker"));
}

#[test]
fn test_worker_requires_name() {
    let dir = TempDir::new().unwrap();
    fb(dir.path()).arg("worker").assert().failure();
}
