//! Integration tests for the firesight command line.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write a config file that points the model cache into `dir`.
fn write_config(dir: &Path) -> PathBuf {
    let cache_dir = dir.join("models");
    let path = dir.join("firesight.toml");
    std::fs::write(
        &path,
        format!(
            "[model]\ncache_dir = {:?}\nruntime = \"in-page\"\n",
            cache_dir.display().to_string()
        ),
    )
    .unwrap();
    path
}

fn firesight(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("firesight");
    cmd.arg("--config")
        .arg(config)
        .env_remove("FIRESIGHT_MANIFEST_URL")
        .env_remove("FIRESIGHT_RUNTIME")
        .env_remove("UPSTASH_REDIS_REST_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("firesight");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("predict"))
        .stdout(predicate::str::contains("model"));
}

#[test]
fn test_predict_requires_files() {
    let mut cmd = cargo_bin_cmd!("firesight");
    cmd.arg("predict");

    cmd.assert().failure().stderr(predicate::str::contains("FILES"));
}

#[test]
fn test_config_path_honours_explicit_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("custom.toml");

    firesight(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_init_then_show() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("nested").join("config.toml");

    firesight(&config)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));
    assert!(config.exists());

    firesight(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[rate_limit]"))
        .stdout(predicate::str::contains("requests = 10"));
}

#[test]
fn test_config_show_redacts_upstash_token() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    firesight(&config)
        .env("UPSTASH_REDIS_REST_TOKEN", "super-secret-token")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<redacted>"))
        .stdout(predicate::str::contains("super-secret-token").not());
}

#[test]
fn test_model_path_prints_cache_dir() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    firesight(&config)
        .args(["model", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("models"));
}

#[test]
fn test_model_check_fails_on_empty_cache() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    firesight(&config)
        .args(["model", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("incomplete"));
}

#[test]
fn test_predict_unreadable_file_does_not_stop_batch() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, "not an image").unwrap();

    firesight(&config)
        .args(["-q", "predict", "does-not-exist.png"])
        .arg(&notes)
        .assert()
        .failure()
        .stdout(predicate::str::contains("does-not-exist.png"))
        .stdout(predicate::str::contains("failed to read image"))
        .stdout(predicate::str::contains("notes.txt"))
        .stdout(predicate::str::contains("could not decode image"))
        .stderr(predicate::str::contains("2 of 2 file(s) could not be classified"));
}

#[test]
fn test_predict_reports_undecodable_image_per_file() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, "not an image").unwrap();

    firesight(&config)
        .args(["-q", "predict", "--json"])
        .arg(&notes)
        .assert()
        .failure()
        .stdout(predicate::str::contains("could not decode image"))
        .stderr(predicate::str::contains("1 of 1 file(s) could not be classified"));
}

#[test]
fn test_predict_without_model_reports_unavailable() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let image_path = dir.path().join("black.png");
    image::RgbImage::new(64, 64).save(&image_path).unwrap();

    firesight(&config)
        .args(["-q", "predict"])
        .arg(&image_path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("model unavailable"));
}
