//! CLI and shutdown integration tests.

use std::process::Command;
use std::time::Duration;

const BIN: &str = env!("CARGO_BIN_EXE_meridian");

/// `--help` should list the allocator flags.
#[test]
fn test_cli_help_output() {
    let output = Command::new(BIN)
        .arg("--help")
        .output()
        .expect("failed to run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--listen-addr",
        "--backend-endpoints",
        "--tso-update-physical-interval",
        "--tso-save-interval",
        "--max-gap-reset-ts",
        "--enable-local-tso",
        "--local-tso-regions",
    ] {
        assert!(stdout.contains(flag), "help should mention {flag}");
    }
}

#[test]
fn test_cli_version_output() {
    let output = Command::new(BIN)
        .arg("--version")
        .output()
        .expect("failed to run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "version output should contain version number: {}",
        stdout
    );
}

#[test]
fn test_cli_rejects_bad_duration() {
    let output = Command::new(BIN)
        .args(["--tso-save-interval", "soon"])
        .output()
        .expect("failed to run");
    assert!(!output.status.success());
}

/// The server exits cleanly on SIGTERM.
#[cfg(unix)]
#[tokio::test]
async fn test_graceful_shutdown_on_sigterm() {
    use std::process::Stdio;
    use tokio::process::Command as TokioCommand;
    use tokio::time::timeout;

    let temp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
    let db = temp_dir.path().join("meridian.db");

    let mut child = TokioCommand::new(BIN)
        .args([
            "--listen-addr",
            "127.0.0.1:0",
            "--backend-endpoints",
            db.to_str().expect("temp path is not utf-8"),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn server");

    tokio::time::sleep(Duration::from_secs(1)).await;

    let pid = child.id().expect("no pid");
    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status();

    match timeout(Duration::from_secs(10), child.wait()).await {
        Ok(Ok(status)) => assert!(status.success(), "server exited with {status}"),
        Ok(Err(e)) => panic!("failed to wait for child: {}", e),
        Err(_) => {
            child.kill().await.expect("failed to kill");
            panic!("server did not respond to SIGTERM within timeout");
        }
    }
}
