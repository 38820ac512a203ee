//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn help_lists_the_subcommands() {
    let mut cmd = cargo_bin_cmd!("slipway");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("check-config"));
}

#[test]
fn check_config_fails_without_configuration() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let mut cmd = cargo_bin_cmd!("slipway");
    cmd.arg("check-config")
        .current_dir(tmp.path())
        .env_clear()
        .env("HOME", tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration"));
}

#[test]
fn check_config_accepts_a_complete_environment() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let mut cmd = cargo_bin_cmd!("slipway");
    cmd.arg("check-config")
        .current_dir(tmp.path())
        .env_clear()
        .env("HOME", tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path())
        .env("SCW_SECRET_KEY", "SCWSECRETKEYEXAMPLE")
        .env("SCW_DEFAULT_PROJECT_ID", "11111111-2222-3333-4444-555555555555")
        .env("SLIPWAY_CALLBACK_BASE_URL", "http://orchestrator.test")
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration ok"))
        .stdout(predicate::str::contains("fr-par-1"));
}
