#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn podflow(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("podflow").unwrap();
    cmd.current_dir(dir)
        .env_remove("PODFLOW_CONFIG")
        .env_remove("PODFLOW_NAMESPACE")
        .env("XDG_CONFIG_HOME", dir.join(".config"));
    cmd
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("podflow").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("podflow").unwrap();
    cmd.arg("version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_build_help_lists_options() {
    let mut cmd = Command::cargo_bin("podflow").unwrap();
    cmd.args(["build", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--tag"))
        .stdout(predicate::str::contains("--build-arg"))
        .stdout(predicate::str::contains("--manifest"));
}

#[test]
fn test_build_without_tag_fails() {
    let dir = tempfile::tempdir().unwrap();
    podflow(dir.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("-t"));
}

#[test]
fn test_build_rejects_malformed_build_arg() {
    let dir = tempfile::tempdir().unwrap();
    podflow(dir.path())
        .args(["build", "-t", "app:v1", "--build-arg", "NOVALUE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_invalid_tag_fails_before_touching_cluster() {
    let dir = tempfile::tempdir().unwrap();
    // kubectl が呼ばれれば別のエラーになる
    fs::write(
        dir.path().join("podflow.kdl"),
        "cluster {\n    kubectl \"/nonexistent/kubectl\"\n}\n",
    )
    .unwrap();
    fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();

    podflow(dir.path())
        .args(["build", "-t", "a:b:c:d"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error processing generated env variables"))
        .stderr(predicate::str::contains("kubectl").not());
}
