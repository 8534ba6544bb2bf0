use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn prints_version() {
    let exe = env!("CARGO_BIN_EXE_posts-tui");
    let output = Command::new(exe)
        .arg("--version")
        .output()
        .expect("run posts-tui --version");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "stdout was: {}",
        stdout.trim()
    );
}

#[test]
fn prints_help() {
    Command::cargo_bin("posts-tui")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("posts-tui"))
        .stdout(predicate::str::contains("--export-html"))
        .stdout(predicate::str::contains("--whoami"));
}

#[test]
fn rejects_unknown_flags() {
    Command::cargo_bin("posts-tui")
        .unwrap()
        .arg("--frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown flag"));
}

#[test]
fn export_needs_a_path() {
    Command::cargo_bin("posts-tui")
        .unwrap()
        .arg("--export-html")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--export-html needs a file path"));
}
