//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

mod common;

use predicates::prelude::*;

use common::modelport_cmd;

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    modelport_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("modelport"))
        .stdout(predicate::str::contains("load"))
        .stdout(predicate::str::contains("backends"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    modelport_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("modelport"))
        .stdout(predicate::str::contains("Build Information"))
        .stdout(predicate::str::contains("Git Hash"))
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn test_short_version_flag() {
    modelport_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("modelport"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    modelport_cmd()
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("[loader]"))
        .stdout(predicate::str::contains("grpc_attempts = 20"))
        .stdout(predicate::str::contains("[storage]"))
        .stdout(predicate::str::contains("[logging]"));
}

#[test]
fn test_config_validate_default() {
    // Default config should always be valid
    modelport_cmd()
        .arg("config")
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_nonexistent_file() {
    let result = modelport_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/path/config.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));

    // Exit code should be in the config error range (10)
    let exit_code = result.get_output().status.code().unwrap_or(1);
    assert_eq!(exit_code, 10, "Expected config error exit code (10)");
}

#[test]
fn test_config_init_help() {
    modelport_cmd()
        .arg("config")
        .arg("init")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialize"))
        .stdout(predicate::str::contains("--path"))
        .stdout(predicate::str::contains("--force"));
}

// ─────────────────────────────────────────────────────────────────
// Load Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_load_help() {
    modelport_cmd()
        .arg("load")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--model"))
        .stdout(predicate::str::contains("--backend"))
        .stdout(predicate::str::contains("--external"))
        .stdout(predicate::str::contains("--single-active"))
        .stdout(predicate::str::contains("--hold"));
}

#[test]
fn test_load_requires_model() {
    modelport_cmd()
        .arg("load")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--model"));
}

#[test]
fn test_load_rejects_malformed_external() {
    let env = common::TestEnvironment::new();

    modelport_cmd()
        .args(["load", "--model", "phi-2", "--config", env.config()])
        .args(["--external", "no-separator"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("name:uri"));
}

#[test]
fn test_backends_help() {
    modelport_cmd()
        .arg("backends")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--asset-dir"));
}

// ─────────────────────────────────────────────────────────────────
// Verbosity Flag Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbose_flag() {
    // -v should work without errors
    modelport_cmd()
        .arg("-v")
        .arg("version")
        .assert()
        .success();
}

#[test]
fn test_very_verbose_flag() {
    // -vv should work without errors
    modelport_cmd()
        .arg("-vv")
        .arg("version")
        .assert()
        .success();
}

#[test]
fn test_quiet_flag() {
    modelport_cmd()
        .arg("--quiet")
        .arg("version")
        .assert()
        .success();
}
