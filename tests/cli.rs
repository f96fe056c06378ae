// Copyright © 2024 AssetFlow. All rights reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn assetflow() -> Command {
    let mut cmd = Command::cargo_bin("assetflow").unwrap();
    _ = cmd.env_remove("ASSETFLOW_ENV").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    _ = assetflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("build")
                .and(predicate::str::contains("watch"))
                .and(predicate::str::contains("serve"))
                .and(predicate::str::contains("init")),
        );
}

#[test]
fn init_then_build_in_both_modes() {
    let dir = TempDir::new().unwrap();

    _ = assetflow()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("assetflow.toml"));

    _ = assetflow()
        .current_dir(dir.path())
        .args(["build", "--mode", "development"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Built "));
    assert!(dir.path().join("dist/js/main.bundle.js").is_file());
    assert!(dir.path().join("dist/js/vendor.bundle.js").is_file());
    assert!(dir.path().join("dist/index.html").is_file());
    assert!(!dir.path().join("dist/css/main.css").exists());

    _ = assetflow()
        .current_dir(dir.path())
        .env("ASSETFLOW_ENV", "production")
        .arg("build")
        .assert()
        .success();
    assert!(dir.path().join("dist/css/main.css").is_file());
}

#[test]
fn missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    _ = assetflow()
        .current_dir(dir.path())
        .args(["build", "--config", "nope.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn build_without_sources_reports_missing_entry() {
    let dir = TempDir::new().unwrap();
    _ = assetflow()
        .current_dir(dir.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Resolution error"));
}

#[test]
fn unknown_mode_is_rejected() {
    _ = assetflow()
        .args(["build", "--mode", "staging"])
        .assert()
        .failure();
}
