//! CLI integration tests for dspace-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for configuration errors.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the dspace-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("dspace-migrate").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--test"))
        .stdout(predicate::str::contains("--tables"))
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dspace-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

// =============================================================================
// Exit Code Tests - Config Errors
// =============================================================================

#[test]
fn test_missing_config_fails() {
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_invalid_yaml_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YAML"));
}

#[test]
fn test_missing_required_fields_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    // Valid YAML but no backend/source sections
    writeln!(file, "engine:").unwrap();
    writeln!(file, "  chunk_size: 1000").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "status"])
        .assert()
        .failure();
}

#[test]
fn test_run_without_version_date_fields_fails_fast() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        concat!(
            "source:\n",
            "  name: clarin-dspace\n",
            "  host: 127.0.0.1\n",
            "  user: postgres\n",
            "  password: dspace\n",
            "backend:\n",
            "  endpoint: http://localhost:8080/server/api/\n",
            "  user: admin@example.com\n",
            "  password: admin\n",
        )
    )
    .unwrap();

    // The item mapping needs version_date_fields; this must fail before
    // anything is read or submitted.
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("version_date_fields"));
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
