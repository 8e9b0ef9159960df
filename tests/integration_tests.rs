//! Integration tests for the collector-setup binary.
//!
//! These exercise the command surface that does not need root or a Postgres
//! server: help output, the step catalog, the inputs template and input
//! file validation.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn setup_cmd() -> Command {
    cargo_bin_cmd!("collector-setup")
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands_and_flags() {
        setup_cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("steps"))
            .stdout(predicate::str::contains("inputs-template"))
            .stdout(predicate::str::contains("--inputs"))
            .stdout(predicate::str::contains("--skip-log-insights"));
    }

    #[test]
    fn test_version() {
        setup_cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        setup_cmd().arg("uninstall").assert().failure();
    }
}

// =============================================================================
// Step catalog
// =============================================================================

mod steps_command {
    use super::*;

    #[test]
    fn test_steps_lists_catalog_in_order() {
        let output = setup_cmd().arg("steps").assert().success().get_output().clone();
        let stdout = String::from_utf8_lossy(&output.stdout);

        let platform = stdout.find("determine_platform").unwrap();
        let connection = stdout.find("establish_superuser_connection").unwrap();
        let restart = stdout.find("confirm_restart_postgres").unwrap();
        let sleep = stdout.find("run_pg_sleep").unwrap();
        assert!(platform < connection);
        assert!(connection < restart);
        assert!(restart < sleep);
    }

    #[test]
    fn test_steps_shows_categories() {
        setup_cmd()
            .arg("steps")
            .assert()
            .success()
            .stdout(predicate::str::contains("[log-insights]"))
            .stdout(predicate::str::contains("[automated-explain]"))
            .stdout(predicate::str::contains("(check only)"));
    }
}

// =============================================================================
// Inputs template
// =============================================================================

mod inputs_template {
    use super::*;

    #[test]
    fn test_template_is_valid_json_with_recommendations() {
        let output = setup_cmd()
            .arg("inputs-template")
            .assert()
            .success()
            .get_output()
            .clone();
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

        assert_eq!(json["settings"]["db_username"], "pganalyze");
        assert_eq!(json["confirm_run_test_command"], true);
        assert_eq!(json["gucs"]["log_min_duration_statement"], 1000);
        assert!(SAMPLE_KEYS.iter().all(|k| json.get(k).is_some()));
    }

    const SAMPLE_KEYS: &[&str] = &["guess_log_location", "confirm_postgres_restart", "skip_pg_sleep"];
}

// =============================================================================
// Inputs file errors
// =============================================================================

mod inputs_errors {
    use super::*;

    #[test]
    fn test_missing_inputs_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");

        setup_cmd()
            .arg("--inputs")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("could not open inputs file"))
            .stderr(predicate::str::contains("absent.json"));
    }

    #[test]
    fn test_malformed_inputs_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inputs.json");
        fs::write(&path, "{ not json").unwrap();

        setup_cmd()
            .arg("--inputs")
            .arg(&path)
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("could not parse inputs file"));
    }

    #[test]
    fn test_unknown_inputs_field_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inputs.json");
        fs::write(&path, r#"{"confirm_postgres_restrat": true}"#).unwrap();

        setup_cmd()
            .arg("--inputs")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("confirm_postgres_restrat"));
    }
}
