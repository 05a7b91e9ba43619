//! CLI tests spawning the `rustify` binary.

use std::fs;
use std::process::Command;

use rustify::exit_codes;
use rustify::io::config::{AppConfig, load_config};

#[test]
fn init_config_writes_loadable_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = Command::new(env!("CARGO_BIN_EXE_rustify"))
        .current_dir(temp.path())
        .arg("init-config")
        .status()
        .expect("rustify init-config");

    assert_eq!(status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join("rustify.toml")).expect("load written config");
    assert_eq!(cfg, AppConfig::default());
}

#[test]
fn init_config_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("rustify.toml");
    fs::write(&path, "# hand-edited\n").expect("write");

    let output = Command::new(env!("CARGO_BIN_EXE_rustify"))
        .current_dir(temp.path())
        .arg("init-config")
        .output()
        .expect("rustify init-config");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--force"));
    assert_eq!(fs::read_to_string(&path).expect("read"), "# hand-edited\n");

    let status = Command::new(env!("CARGO_BIN_EXE_rustify"))
        .current_dir(temp.path())
        .args(["init-config", "--force"])
        .status()
        .expect("rustify init-config --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_ne!(fs::read_to_string(&path).expect("read"), "# hand-edited\n");
}

#[test]
fn invalid_config_fails_with_context() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("rustify.toml"), "[repair]\nmax_retry = 0\n").expect("write");

    let output = Command::new(env!("CARGO_BIN_EXE_rustify"))
        .current_dir(temp.path())
        .args(["explain", "what does it do?"])
        .output()
        .expect("rustify explain");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max_retry"), "{stderr}");
}

#[test]
fn explain_without_sources_fails_before_calling_a_backend() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = Command::new(env!("CARGO_BIN_EXE_rustify"))
        .current_dir(temp.path())
        .args(["explain", "what does it do?"])
        .output()
        .expect("rustify explain");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nothing to explain"), "{stderr}");
}
