use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn pageview() -> Command {
    let mut cmd = Command::cargo_bin("pageview").expect("binary should be built");
    // Keep the host's settings out of the contract
    cmd.env("XDG_CONFIG_HOME", env!("CARGO_TARGET_TMPDIR"))
        .env_remove("PAGEVIEW_WORKERS")
        .env_remove("PAGEVIEW_FOREGROUND_WORKERS")
        .env_remove("PAGEVIEW_POOL_MB")
        .env_remove("PAGEVIEW_PRELOAD_WINDOW")
        .env_remove("PAGEVIEW_TIMEOUT_MS");
    cmd
}

fn comic(pages: usize) -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    for index in 0..pages {
        let data = vec![index as u8 + 1; 100 * (index + 1)];
        fs::write(dir.path().join(format!("{:03}.png", index)), data).unwrap();
    }
    fs::write(dir.path().join("info.txt"), "not a page").unwrap();
    dir
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect()
}

fn write_config(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn version_prints_package_version() {
    pageview()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn info_emits_stable_json_contract() {
    let dir = comic(3);

    let output = pageview()
        .arg("info")
        .arg(dir.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value: Value = serde_json::from_slice(&output).expect("stdout should contain valid json");
    assert_eq!(value["total_pages"], 3);
    assert_eq!(value["pages"][0], "000.png");
    assert_eq!(value["container"], dir.path().to_string_lossy().as_ref());
}

#[test]
fn read_reports_each_page_then_stats() {
    let dir = comic(4);

    let output = pageview()
        .arg("read")
        .arg(dir.path())
        .arg("--pages")
        .arg("0,2")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 3);

    assert_eq!(lines[0]["index"], 0);
    assert_eq!(lines[0]["size"], 100);
    assert_eq!(lines[0]["mime_type"], "image/png");
    assert_eq!(lines[0]["cache_hit"], false);

    assert_eq!(lines[1]["index"], 2);
    assert_eq!(lines[1]["size"], 300);

    let stats = &lines[2];
    assert_eq!(stats["total_pages"], 4);
    assert_eq!(stats["current_index"], 2);
    assert!(stats["pool"]["entry_count"].as_u64().unwrap() >= 2);
}

#[test]
fn read_defaults_to_every_page() {
    let dir = comic(3);
    let config = write_config(dir.path(), "preload_window = 0\n");

    let output = pageview()
        .arg("read")
        .arg(dir.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let lines = json_lines(&output);
    let indices: Vec<u64> = lines[..3].iter().map(|l| l["index"].as_u64().unwrap()).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(lines[..3].iter().all(|l| l["cache_hit"] == false));
    assert_eq!(lines[3]["cached_pages"], serde_json::json!([0, 1, 2]));
}

#[test]
fn read_fails_for_page_out_of_range() {
    let dir = comic(2);

    pageview()
        .arg("read")
        .arg(dir.path())
        .arg("--pages")
        .arg("5")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load page 5"))
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn read_rejects_invalid_config() {
    let dir = comic(1);
    let config = write_config(dir.path(), "worker_count = 2\nforeground_workers = 2\n");

    pageview()
        .arg("read")
        .arg(dir.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("foreground_workers"));
}

#[test]
fn read_rejects_invalid_env_override() {
    let dir = comic(1);

    pageview()
        .arg("read")
        .arg(dir.path())
        .env("PAGEVIEW_POOL_MB", "huge")
        .assert()
        .failure()
        .stderr(predicate::str::contains("PAGEVIEW_POOL_MB"));
}

#[test]
fn info_fails_for_missing_directory() {
    let dir = tempfile::tempdir().unwrap();

    pageview()
        .arg("info")
        .arg(dir.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("directory does not exist"));
}
