//! Integration tests for the attest CLI.
//!
//! Evaluations use `--dry-run`, so no API keys or network are needed.

use std::path::PathBuf;
use std::process::Command;

const CHECKLIST: &str = r#"
name: "CLI Checklist"
framework_id: "ISO-TEST"
requirements:
  - id: "R1"
    text: "A policy exists"
  - id: "R2"
    text: "The policy is reviewed yearly"
  - id: "R3"
    text: "Reviews are signed off"
"#;

/// Helper to run the CLI binary with arguments.
fn run_cli(args: &[&str]) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_attest"));
    cmd.args(args)
        .env_remove("VISION_PROVIDER")
        .env_remove("VISION_COMPARE_BOTH")
        .env_remove("VISION_EVALUATOR_REQUIREMENT_LIMIT")
        .env("RUST_LOG", "error");
    cmd.output().expect("Failed to execute attest CLI")
}

fn fixture(name: &str, contents: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("attest-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_cli_help() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("evaluate"));
    assert!(stdout.contains("validate-checklist"));
}

#[test]
fn test_validate_checklist() {
    let checklist = fixture("valid.yaml", CHECKLIST.as_bytes());
    let output = run_cli(&["validate-checklist", checklist.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CLI Checklist: 3 requirements (framework ISO-TEST)"));
}

#[test]
fn test_validate_rejects_duplicate_ids() {
    let checklist = fixture(
        "dupes.yaml",
        b"name: x\nrequirements:\n  - id: A\n    text: one\n  - id: A\n    text: two\n",
    );
    let output = run_cli(&["validate-checklist", checklist.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid checklist"));
}

#[test]
fn test_dry_run_dual_json() {
    let checklist = fixture("dual.yaml", CHECKLIST.as_bytes());
    let document = fixture("plan.pdf", b"%PDF-1.7 plan");
    let output = run_cli(&[
        "evaluate",
        document.to_str().unwrap(),
        "--checklist",
        checklist.to_str().unwrap(),
        "--provider",
        "dual",
        "--limit",
        "2",
        "--output",
        "json",
        "--dry-run",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["document"]["name"], "plan.pdf");
    assert_eq!(summary["document"]["mode"], "dual");
    assert_eq!(summary["verdicts"].as_array().unwrap().len(), 2);
    assert_eq!(summary["statistics"]["compliance_score"], 100.0);
}

#[test]
fn test_unknown_provider_fails() {
    let checklist = fixture("unknown.yaml", CHECKLIST.as_bytes());
    let document = fixture("doc.pdf", b"%PDF");
    let output = run_cli(&[
        "evaluate",
        document.to_str().unwrap(),
        "--checklist",
        checklist.to_str().unwrap(),
        "--provider",
        "mistral",
        "--dry-run",
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("mistral"));
}

#[test]
fn test_config_prints_yaml() {
    let output = run_cli(&["config"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("max_concurrent: 2"));
    assert!(stdout.contains("tokens_per_minute: 450000"));
}
