//! Integration tests for the `mongard` binary entry point.
//!
//! Verifies help output and user-facing error handling for commands that
//! require a running server or a readable manifest.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

#[test]
fn help_lists_command_families() {
    let mut command = cargo_bin_cmd!("mongard");
    command.arg("--help");
    command
        .assert()
        .success()
        .stdout(contains("server"))
        .stdout(contains("import"))
        .stdout(contains("scripts"));
}

#[test]
fn unknown_command_exits_with_failure() {
    let mut command = cargo_bin_cmd!("mongard");
    command.arg("frobnicate");
    command.assert().failure();
}

#[test]
fn stop_without_a_running_server_reports_not_running() {
    let runtime = TempDir::new().expect("temp dir");
    let mut command = cargo_bin_cmd!("mongard");
    command.args([
        "--runtime-dir",
        runtime.path().to_str().expect("utf-8 path"),
        "server",
        "stop",
    ]);
    command
        .assert()
        .failure()
        .stderr(contains("server is not running"));
}

#[test]
fn status_without_a_running_server_prints_guidance() {
    let runtime = TempDir::new().expect("temp dir");
    let mut command = cargo_bin_cmd!("mongard");
    command.args([
        "--runtime-dir",
        runtime.path().to_str().expect("utf-8 path"),
        "server",
        "status",
    ]);
    command
        .assert()
        .success()
        .stdout(contains("not running"));
}

#[test]
fn skip_short_circuits_server_start() {
    let runtime = TempDir::new().expect("temp dir");
    let mut command = cargo_bin_cmd!("mongard");
    command.args([
        "--skip",
        "--runtime-dir",
        runtime.path().to_str().expect("utf-8 path"),
        "server",
        "start",
    ]);
    command.assert().success().stdout(contains("skip is set"));
}

#[test]
fn import_with_a_missing_manifest_fails() {
    let mut command = cargo_bin_cmd!("mongard");
    command.args(["import", "no-such-manifest.toml"]);
    command
        .assert()
        .failure()
        .stderr(contains("bulk import failed"));
}
