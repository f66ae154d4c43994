//! Integration tests driving the crucible executable

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn crucible(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_crucible"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to launch crucible")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_lists_options() {
    let output = crucible(&["--help"]);
    assert!(output.status.success());

    let help = String::from_utf8_lossy(&output.stdout);
    for flag in ["--components", "--mode", "--duration", "--sample-freq", "--log-dir"] {
        assert!(help.contains(flag), "help is missing {}", flag);
    }
}

#[test]
fn test_version() {
    let output = crucible(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_invalid_mode_is_usage_error() {
    let output = crucible(&["--mode", "turbo"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("unknown test mode 'turbo'"));
}

#[test]
fn test_cadence_longer_than_duration_is_rejected() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("logs");

    let output = crucible(&[
        "--components",
        "cpu",
        "--duration",
        "2",
        "--sample-freq",
        "5",
        "--diagnostics",
        "0",
        "--log-dir",
        log_dir.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("cannot be greater than test duration"));
    assert!(!log_dir.exists());
}

fn assert_session_files(log_dir: &Path) {
    let session = std::fs::read_to_string(log_dir.join("session.log")).unwrap();
    assert!(session.contains("Logging initialized"));
    assert!(session.contains("Running cpu baseline"));
    assert!(session.trim_end().ends_with("Logging system shutting down"));

    let metrics = std::fs::read_to_string(log_dir.join("metrics.csv")).unwrap();
    let mut rows = metrics.lines();
    assert_eq!(rows.next(), Some("timestamp,elapsed_seconds,metric,values"));
    assert!(rows.any(|r| r.contains(",cpu.usage,baseline,")));
}

#[test]
fn test_short_baseline_run_writes_logs_and_report() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("logs");

    let output = crucible(&[
        "--components",
        "cpu",
        "--mode",
        "baseline",
        "--duration",
        "1",
        "--sample-freq",
        "1",
        "--diagnostics",
        "0",
        "--log-dir",
        log_dir.to_str().unwrap(),
    ]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_session_files(&log_dir);

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(log_dir.join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["outcomes"][0]["workers"], 0);

    let prom = std::fs::read_to_string(log_dir.join("crucible.prom")).unwrap();
    assert!(prom.contains("crucible_plans_completed_total"));
}
