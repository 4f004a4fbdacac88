//! End-to-end tests for the `leadgate` binary.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("leadgate")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sources"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn sources_new_succeeds_and_prints_once_only_credentials() {
    Command::cargo_bin("leadgate")
        .unwrap()
        .args(["sources", "new", "--name", "Meta Ads"])
        .assert()
        .success()
        .stdout(predicate::str::contains("shown once"))
        .stdout(predicate::str::contains("api_key_hash:"));
}

#[test]
fn sources_hash_is_stable() {
    Command::cargo_bin("leadgate")
        .unwrap()
        .args(["sources", "hash", "abc"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        ));
}

#[test]
fn config_validate_fails_on_missing_file() {
    Command::cargo_bin("leadgate")
        .unwrap()
        .args(["config", "validate", "--file", "/does/not/exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
