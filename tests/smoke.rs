//! Smoke tests -- verify the binary runs and its subcommands work.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("cellwatch.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("cellwatch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Edge anomaly detection"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("cellwatch")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("cellwatch"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "model-info", "fit-fallback", "check-config"] {
        Command::cargo_bin("cellwatch")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_check_config_accepts_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[ml]\nwindow_size = 6\n");

    Command::cargo_bin("cellwatch")
        .unwrap()
        .arg("check-config")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("window_size = 6"))
        .stdout(contains("configuration OK"));
}

#[test]
fn test_check_config_redacts_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "[server]\napi_key = \"s3cret-key\"\n\n[storage.influx]\ntoken = \"influx-tok\"\n",
    );

    Command::cargo_bin("cellwatch")
        .unwrap()
        .arg("check-config")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("<redacted>"))
        .stdout(contains("s3cret-key").not())
        .stdout(contains("influx-tok").not());
}

#[test]
fn test_check_config_rejects_zero_window() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[ml]\nwindow_size = 0\n");

    Command::cargo_bin("cellwatch")
        .unwrap()
        .arg("check-config")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("window_size"));
}

#[test]
fn test_fit_fallback_then_model_info() {
    let dir = tempfile::tempdir().unwrap();

    let rows: Vec<[f64; 10]> = (0..64)
        .map(|i| {
            let v = (i % 8) as f64;
            [v, 0.5, v + 1.0, v - 1.0, 300.0 + v, 2.0, 310.0, 1.0, 22.0, 1.0]
        })
        .collect();
    let input = dir.path().join("features.json");
    std::fs::write(&input, serde_json::to_string(&rows).unwrap()).unwrap();
    let forest = dir.path().join("models").join("iforest.json");

    Command::cargo_bin("cellwatch")
        .unwrap()
        .args(["fit-fallback", "--trees", "20", "--seed", "7"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&forest)
        .assert()
        .success()
        .stdout(contains("Fitted 20 trees on 64 rows"));
    assert!(forest.exists());

    let config = write_config(
        dir.path(),
        &format!(
            "[ml]\nmodel_artifact_path = '{}'\nfallback_artifact_path = '{}'\n",
            dir.path().join("missing.json").display(),
            forest.display()
        ),
    );

    Command::cargo_bin("cellwatch")
        .unwrap()
        .args(["model-info", "--json", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("\"model_version\": \"iforest_loaded\""))
        .stdout(contains("\"primary\": null"));
}

#[test]
fn test_model_info_without_artifacts_uses_untrained_forest() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            "[ml]\nfallback_artifact_path = '{}'\n",
            dir.path().join("absent.json").display()
        ),
    );

    Command::cargo_bin("cellwatch")
        .unwrap()
        .args(["model-info", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("iforest_default"));
}
