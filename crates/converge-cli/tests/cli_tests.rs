//! CLI integration tests

use std::process::Command;

fn converge(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "converge-cli", "--"])
        .args(args)
        .env_remove("CONVERGE_CONFIG")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = converge(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Single-host database deployment reconciler"),
        "Should show app description"
    );
    for command in ["deploy", "probe", "plan", "status", "restart", "scripts"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = converge(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("converge"), "Should show binary name");
}

#[test]
fn test_deploy_help() {
    let output = converge(&["deploy", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Deploy help should succeed");
    assert!(stdout.contains("--set"), "Should show --set option");
    assert!(stdout.contains("--no-baseline"), "Should show --no-baseline option");
    assert!(stdout.contains("--scripts-dir"), "Should show --scripts-dir option");
}

#[test]
fn test_plan_what_if_memory_as_json() {
    let output = converge(&["--format", "json", "plan", "--memory-bytes", "17179869184"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Plan should succeed");
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("Plan output is JSON");
    assert_eq!(
        value["plan"]["container_memory_limit_bytes"],
        serde_json::json!(12u64 * 1024 * 1024 * 1024)
    );
    assert!(value["settings"]
        .as_array()
        .map(|s| !s.is_empty())
        .unwrap_or(false));
}

#[test]
fn test_scripts_are_written_without_runtime() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = converge(&["scripts", "--output", dir.path().to_str().unwrap()]);

    assert!(
        output.status.success(),
        "Scripts should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let status = std::fs::read_to_string(dir.path().join("status.sh")).unwrap();
    let start = std::fs::read_to_string(dir.path().join("start.sh")).unwrap();
    assert!(status.contains("converge-db"));
    assert!(start.contains("pg_isready"));
}

#[test]
fn test_invalid_setting_is_rejected() {
    let output = converge(&["deploy", "--set", "no-equals-sign"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Bad --set should fail");
    assert!(stderr.contains("KEY=VALUE"), "Should explain the expected form");
}

#[test]
fn test_metrics_file_written_when_run_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let metrics = dir.path().join("converge.prom");
    let missing_config = dir.path().join("missing.toml");

    let output = converge(&[
        "--metrics-file",
        metrics.to_str().unwrap(),
        "--config",
        missing_config.to_str().unwrap(),
        "status",
    ]);

    assert!(!output.status.success(), "Missing config should fail");
    let text = std::fs::read_to_string(&metrics).expect("Metrics file should exist");
    assert!(text.contains("converge_settings_applied_total"));
}
