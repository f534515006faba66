//! End-to-end CLI tests for the download-scheduler binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command with the config lookup pointed at an empty directory.
fn isolated_command(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("download-scheduler").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let config_home = TempDir::new().unwrap();
    isolated_command(&config_home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulate a batch of catalog downloads"));
}

#[test]
fn test_binary_version_displays_version() {
    let config_home = TempDir::new().unwrap();
    isolated_command(&config_home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("download-scheduler"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let config_home = TempDir::new().unwrap();
    isolated_command(&config_home)
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_rejects_out_of_range_concurrency() {
    let config_home = TempDir::new().unwrap();
    isolated_command(&config_home)
        .args(["--max-concurrent", "11"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max-concurrent"));
}

#[test]
fn test_binary_runs_simulation_to_completion() {
    let config_home = TempDir::new().unwrap();
    isolated_command(&config_home)
        .args(["-q", "-n", "2", "--size-mib", "1", "--tick-ms", "10"])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("[created  ]"))
        .stdout(predicate::str::contains("2 tasks: 2 completed"));
}

#[test]
fn test_binary_refuses_downloads_over_concurrency_limit() {
    let config_home = TempDir::new().unwrap();
    isolated_command(&config_home)
        .args(["-q", "-n", "3", "-c", "1", "--size-mib", "1", "--tick-ms", "10"])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("[refused]"))
        .stdout(predicate::str::contains("concurrency limit"))
        .stdout(predicate::str::contains("1 tasks: 1 completed"));
}

#[test]
fn test_binary_reads_config_file() {
    let config_home = TempDir::new().unwrap();
    let app_dir = config_home.path().join("download-scheduler");
    std::fs::create_dir_all(&app_dir).unwrap();
    std::fs::write(app_dir.join("config.toml"), "max_concurrent = 0\n").unwrap();

    isolated_command(&config_home)
        .args(["-n", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_concurrent"));
}

#[test]
fn test_binary_persists_to_database() {
    let config_home = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("tasks.db");

    isolated_command(&config_home)
        .args(["-q", "-n", "1", "--size-mib", "1", "--tick-ms", "10"])
        .arg("--db")
        .arg(&db_path)
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success();
    assert!(db_path.exists());

    // The completed task is restored, and the duplicate guard does not apply to it.
    isolated_command(&config_home)
        .args(["-q", "-n", "1", "--size-mib", "1", "--tick-ms", "10"])
        .arg("--db")
        .arg(&db_path)
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("2 tasks: 2 completed"));
}

#[test]
fn test_binary_json_summary() {
    let config_home = TempDir::new().unwrap();
    let output = isolated_command(&config_home)
        .args(["-q", "--json", "-n", "1", "--size-mib", "1", "--tick-ms", "10"])
        .timeout(std::time::Duration::from_secs(60))
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let json_start = stdout.find('{').unwrap();
    let stats: serde_json::Value = serde_json::from_str(&stdout[json_start..]).unwrap();
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["completed"], 1);
}
