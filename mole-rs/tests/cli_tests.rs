//! Integration tests for the mole CLI.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn run_cli(args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("mole").expect("Failed to find mole binary");
    cmd.args(args);
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    run_cli(&["--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("train"))
        .stdout(predicate::str::contains("predict"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_validate_command_valid_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = common::setup(temp_dir.path(), "MoLE_DLinear");

    run_cli(&["validate", config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("MoLE_DLinear"));
}

#[test]
fn test_validate_command_rejects_label_longer_than_input() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let yaml = common::config_yaml(temp_dir.path(), "MoLE_DLinear")
        .replace("label_len: 12", "label_len: 48");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    run_cli(&["validate", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("label_len"));
}

#[test]
fn test_validate_command_unknown_model() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = common::setup(temp_dir.path(), "Informer");

    run_cli(&["validate", config_path.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn test_validate_command_missing_file() {
    run_cli(&["validate", "/nonexistent/config.yaml"])
        .assert()
        .failure();
}

#[test]
fn test_init_command_writes_preset() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = temp_dir.path().join("weather.yaml");

    run_cli(&[
        "init",
        output.to_str().unwrap(),
        "--preset",
        "weather-mole-rmlp",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("Configuration written to"));

    let content = fs::read_to_string(&output).unwrap();
    assert!(content.contains("MoLE_RMLP"));
    assert!(content.contains("10min"));

    run_cli(&["validate", output.to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn test_init_command_unknown_preset() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = temp_dir.path().join("config.yaml");

    run_cli(&["init", output.to_str().unwrap(), "--preset", "gpt-7b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("gpt-7b"));
    assert!(!output.exists());
}

#[test]
fn test_train_command_end_to_end() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = common::setup(temp_dir.path(), "MoLE_DLinear");

    run_cli(&[
        "train",
        config_path.to_str().unwrap(),
        "--epochs",
        "1",
        "--select-head",
        "--predict",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("Selected head"))
    .stdout(predicate::str::contains("mse:"))
    .stdout(predicate::str::contains("Prediction shape: [1, 8, 3]"));

    let result = fs::read_to_string(temp_dir.path().join("result.txt")).unwrap();
    // validation head selection plus the final test
    assert_eq!(result.matches("mse:").count(), 2);

    run_cli(&["test", config_path.to_str().unwrap(), "--separate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Best head"));

    run_cli(&["predict", config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Prediction [1, 8, 3]"));
}

#[test]
fn test_test_command_without_checkpoint_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = common::setup(temp_dir.path(), "DLinear");

    run_cli(&["test", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no checkpoint"));
}

#[test]
fn test_test_command_head_flags_conflict() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = common::setup(temp_dir.path(), "MoLE_DLinear");

    run_cli(&[
        "test",
        config_path.to_str().unwrap(),
        "--head",
        "1",
        "--separate",
    ])
    .assert()
    .failure();
}
