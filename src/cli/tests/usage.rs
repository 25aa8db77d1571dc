//! Integration test: argument handling of the built `soci-wrapper` binary.
//!
//! These run without network access: every case exits before the registry
//! is contacted.

use std::process::{Command, Output};

use tempfile::TempDir;

fn run(args: &[&str], scratch: &TempDir) -> Output {
    Command::new(env!("CARGO_BIN_EXE_soci-wrapper"))
        .args(args)
        .env("SOCI_WRAPPER_SCRATCH_DIR", scratch.path())
        .env_remove("REGISTRY_USERNAME")
        .env_remove("REGISTRY_PASSWORD")
        .output()
        .unwrap()
}

fn is_empty(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path()).unwrap().next().is_none()
}

#[test]
fn test_too_few_arguments_prints_usage() {
    let scratch = TempDir::new().unwrap();
    let output = run(&["team/app", "sha256:abc"], &scratch);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: soci-wrapper REPOSITORY_NAME IMAGE_DIGEST AWS_REGION AWS_ACCOUNT"));
    assert!(is_empty(&scratch));
}

#[test]
fn test_no_arguments_prints_usage() {
    let scratch = TempDir::new().unwrap();
    let output = run(&[], &scratch);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage"));
}

#[test]
fn test_invalid_digest_prints_usage() {
    let scratch = TempDir::new().unwrap();
    let output = run(&["team/app", "latest", "us-west-2", "123456789012"], &scratch);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid digest"));
    assert!(is_empty(&scratch));
}

#[test]
fn test_version_flag() {
    let scratch = TempDir::new().unwrap();
    let output = run(&["--version"], &scratch);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}
