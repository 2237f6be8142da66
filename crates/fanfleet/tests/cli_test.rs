//! Integration tests for the `fanfleet` CLI binary.
//!
//! Argument parsing, config handling, and `ctl` against throwaway UDP
//! sockets. Nothing here binds the discovery ports.
#![allow(clippy::unwrap_used)]

use std::net::UdpSocket;
use std::path::Path;
use std::thread;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Command isolated from the user's environment and real config.
fn fanfleet_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("fanfleet");
    cmd.env("HOME", "/tmp/fanfleet-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/fanfleet-cli-test-nonexistent")
        .env_remove("FANFLEET_CONFIG")
        .env_remove("FANFLEET_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_usage() {
    let output = fanfleet_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn help_lists_commands() {
    fanfleet_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("fan array")
            .and(predicate::str::contains("run"))
            .and(predicate::str::contains("discover"))
            .and(predicate::str::contains("ctl")),
    );
}

#[test]
fn version_flag() {
    fanfleet_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fanfleet"));
}

#[test]
fn completions_zsh() {
    fanfleet_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn completions_bash() {
    fanfleet_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_path_honors_flag() {
    fanfleet_cmd()
        .args(["-c", "/tmp/somewhere/fanfleet.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/somewhere/fanfleet.toml"));
}

#[test]
fn config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    fanfleet_cmd()
        .args(["-c", path_arg(&path), "config", "init"])
        .assert()
        .success();
    assert!(std::fs::read_to_string(&path).unwrap().contains("[network]"));

    fanfleet_cmd()
        .args(["-c", path_arg(&path), "config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    fanfleet_cmd()
        .args(["-c", path_arg(&path), "config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn config_show_redacts_passcode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[network]\npasscode = \"hunter2\"\n").unwrap();

    fanfleet_cmd()
        .args(["-c", path_arg(&path), "-o", "json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("********").and(predicate::str::contains("hunter2").not()));
}

#[test]
fn invalid_config_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[array]\nrows = 0\n").unwrap();

    let output = fanfleet_cmd()
        .args(["-c", path_arg(&path), "run"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("array.rows"));
}

// ── ctl ─────────────────────────────────────────────────────────────

#[test]
fn ctl_rejects_unknown_code_locally() {
    fanfleet_cmd()
        .args(["ctl", "127.0.0.1:9", "LAUNCH"])
        .assert()
        .code(2);
}

#[test]
fn ctl_times_out_against_silent_listener() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = silent.local_addr().unwrap().to_string();

    fanfleet_cmd()
        .args(["ctl", &target, "F", "--timeout-ms", "200"])
        .assert()
        .code(8);
}

/// Answers one command with a fixed value, echoing its sequence number.
fn spawn_responder(reply_code: &'static str, value: &'static str) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = socket.local_addr().unwrap().to_string();
    thread::spawn(move || {
        let mut buf = [0u8; 1024];
        let (len, from) = socket.recv_from(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..len]).into_owned();
        let seq = text.split('|').next().unwrap().to_owned();
        let reply = format!("{seq}|{reply_code}|{value}");
        socket.send_to(reply.as_bytes(), from).unwrap();
    });
    target
}

#[test]
fn ctl_prints_reply_value() {
    let target = spawn_responder("F", "1200,1300,-1,-1");
    fanfleet_cmd()
        .args(["ctl", &target, "f"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1200,1300,-1,-1"));
}

#[test]
fn ctl_error_reply_fails() {
    let target = spawn_responder("ERROR", "Duty cycle 1.5 is outside [0, 1]");
    fanfleet_cmd()
        .args(["ctl", &target, "DC-UNIFORM", "0.5"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("outside"));
}
