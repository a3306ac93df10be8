//! End-to-end tests for the `config` and `cache` subcommands.
//!
//! These run the built binary against temporary config files and never
//! touch the network or the per-user config directory.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn imagetier(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_imagetier"))
        .args(args)
        .output()
        .expect("failed to run imagetier binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_config(path: &Path, cache_dir: &Path) {
    let content = format!(
        "[cache]\ndirectory = {}\ndisk_size = 1MB\n\n[engine]\nreload_times = 5\n",
        cache_dir.display()
    );
    fs::write(path, content).unwrap();
}

#[test]
fn test_config_init_writes_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested/config.ini");
    let path_str = path.to_str().unwrap();

    let output = imagetier(&["config", "init", "--path", path_str]);
    assert!(output.status.success(), "{:?}", output);

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("[cache]"));
    assert!(written.contains("[engine]"));
    assert!(written.contains("[network]"));
    assert!(written.contains("[logging]"));
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.ini");
    fs::write(&path, "[engine]\nreload_times = 7\n").unwrap();
    let path_str = path.to_str().unwrap();

    let output = imagetier(&["config", "init", "--path", path_str]);
    assert_eq!(output.status.code(), Some(2));
    assert!(fs::read_to_string(&path).unwrap().contains("reload_times = 7"));

    let output = imagetier(&["config", "init", "--path", path_str, "--force"]);
    assert!(output.status.success());
    assert!(!fs::read_to_string(&path).unwrap().contains("reload_times = 7"));
}

#[test]
fn test_config_show_prints_effective_settings() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.ini");
    write_config(&path, &temp_dir.path().join("cache"));

    let output = imagetier(&["config", "show", "--path", path.to_str().unwrap()]);
    assert!(output.status.success(), "{:?}", output);

    let text = stdout(&output);
    assert!(text.contains("reload_times = 5"));
    assert!(text.contains("disk_size = 1MB"));
}

#[test]
fn test_config_show_rejects_invalid_value() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.ini");
    fs::write(&path, "[engine]\nnetwork_threads = many\n").unwrap();

    let output = imagetier(&["config", "show", "--path", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("engine.network_threads"), "{err}");
}

#[test]
fn test_cache_stats_and_clear() {
    let temp_dir = TempDir::new().unwrap();
    let cache_dir = temp_dir.path().join("cache");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(cache_dir.join("0123abcd"), vec![0u8; 2048]).unwrap();

    let path = temp_dir.path().join("config.ini");
    write_config(&path, &cache_dir);
    let path_str = path.to_str().unwrap();

    let output = imagetier(&["cache", "--config", path_str, "stats"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("Entries: 1"));

    let output = imagetier(&["cache", "--config", path_str, "clear"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("Deleted 1 entries"));
    assert!(!cache_dir.join("0123abcd").exists());
}
