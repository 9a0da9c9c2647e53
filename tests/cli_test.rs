//! CLI contract tests.

use std::io::Write;

use assert_cmd::Command;

fn steamspeed() -> Command {
    Command::cargo_bin("steamspeed").expect("binary built")
}

#[test]
fn help_lists_subcommands() {
    let output = steamspeed().arg("--help").output().expect("run --help");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run"));
    assert!(stdout.contains("watch"));
    assert!(stdout.contains("info"));
}

#[test]
fn run_help_shows_steamcmd_overrides() {
    let output = steamspeed()
        .args(["run", "--help"])
        .output()
        .expect("run run --help");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--app"));
    assert!(stdout.contains("--user"));
    assert!(stdout.contains("--password"));
    assert!(stdout.contains("--timeout"));
    assert!(stdout.contains("--json"));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[steam]\nplatform = \"amiga\"\n").expect("write config");

    steamspeed()
        .arg("--config")
        .arg(&config)
        .args(["watch", "--timeout", "1"])
        .assert()
        .failure();
}

#[test]
fn watch_missing_log_fails() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = steamspeed()
        .env("HOME", dir.path())
        .args(["watch", "--timeout", "1", "--log"])
        .arg(dir.path().join("missing.txt"))
        .output()
        .expect("run watch");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to open log file"));
}

#[test]
fn watch_times_out_on_quiet_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("content_log.txt");
    let mut f = std::fs::File::create(&log).expect("create log");
    writeln!(f, "[2018-03-11 11:00:00] old line").expect("write");

    let output = steamspeed()
        .env("HOME", dir.path())
        .args(["watch", "--timeout", "1", "--log"])
        .arg(&log)
        .output()
        .expect("run watch");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no activity"));
}
