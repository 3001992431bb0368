//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("relaycheck")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Diagnostics and conformance testing for tunneling relay namespaces",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("relaycheck")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("relaycheck"));
}

#[test]
fn test_netstat_subcommand_exists() {
    Command::cargo_bin("relaycheck")
        .unwrap()
        .args(["netstat", "--help"])
        .assert()
        .success();
}

#[test]
fn test_namespace_subcommand_exists() {
    Command::cargo_bin("relaycheck")
        .unwrap()
        .args(["namespace", "--help"])
        .assert()
        .success();
}

#[test]
fn test_test_subcommand_exists() {
    Command::cargo_bin("relaycheck")
        .unwrap()
        .args(["test", "--help"])
        .assert()
        .success();
}

#[test]
fn test_invalid_filter_pattern_fails() {
    Command::cargo_bin("relaycheck")
        .unwrap()
        .args(["test", "--filter", "["])
        .assert()
        .failure();
}
