mod common;

use assert_cmd::Command;
use predicates::{prelude::PredicateBooleanExt, str::contains};

const BIN_NAME: &str = "finledger";

fn command() -> Command {
    let mut cmd = Command::cargo_bin(BIN_NAME).expect("binary exists");
    cmd.env("FINLEDGER_HOME", common::temp_home());
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_commands() {
    command()
        .arg("help")
        .assert()
        .success()
        .stdout(contains("sweep").and(contains("daemon")).and(contains("version")));
}

#[test]
fn no_arguments_prints_help() {
    command().assert().success().stdout(contains("Usage: finledger"));
}

#[test]
fn version_prints_build_metadata() {
    command()
        .arg("version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")).and(contains("commit")));
}

#[test]
fn sweep_on_empty_store_reports_nothing_to_do() {
    command()
        .arg("sweep")
        .assert()
        .success()
        .stdout(contains("0 users").and(contains("0 transitions")));
}

#[test]
fn unknown_command_fails() {
    command()
        .arg("bogus")
        .assert()
        .failure()
        .stderr(contains("unknown command"));
}
