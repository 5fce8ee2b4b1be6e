//! `polyglot` binary behaviour that needs no real language server.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

use crate::common::polyglot_bin;

const FAKE_SERVER: &str = r#"
[servers.echo]
command = "cat"
args = ["-u"]
language_id = "plaintext"
file_extensions = ["txt"]
"#;

fn polyglot(config: &Path, root: &Path, args: &[&str]) -> Output {
    Command::new(polyglot_bin())
        .arg("--config")
        .arg(config)
        .arg("--root")
        .arg(root)
        .args(args)
        .env("POLYGLOT_LOG", "warn")
        .output()
        .expect("polyglot binary runs")
}

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("polyglot.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn probe_prints_launch_command_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), FAKE_SERVER);

    let output = polyglot(&config, dir.path(), &["--language", "echo", "probe"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["language"], "echo");
    assert_eq!(json["available"], true);
    assert_eq!(json["command"], "cat -u");
}

#[test]
fn unknown_language_fails_with_known_list() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), FAKE_SERVER);

    let output = polyglot(&config, dir.path(), &["--language", "cobol", "probe"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cobol"), "{stderr}");
    assert!(stderr.contains("echo, qml"), "{stderr}");
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[client\n");

    let output = polyglot(&config, dir.path(), &["probe"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("loading configuration"), "{stderr}");
}

#[cfg(unix)]
#[test]
fn failed_handshake_exits_with_error() {
    // `cat` echoes the initialize request back, so the handshake is rejected.
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), FAKE_SERVER);
    std::fs::write(dir.path().join("notes.txt"), "hello\n").unwrap();

    let output = polyglot(
        &config,
        dir.path(),
        &["--language", "echo", "symbols", "notes.txt"],
    );
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("starting echo language server"), "{stderr}");
}
