//! CLI integration tests for the campaign-recovery binary
//!
//! These tests run the compiled binary against JSON stores in temporary
//! directories, some pre-populated through the library.

use std::path::Path;
use std::sync::Arc;

use assert_cmd::Command;
use chrono::Utc;
use predicates::prelude::*;

use campaign_recovery::recovery::{RecoveryOrchestrator, StepFailure};
use campaign_recovery::snapshot::{PlatformProgress, SnapshotPatch};
use campaign_recovery::storage::JsonFileStore;

/// Get a Command instance for the campaign-recovery binary
#[allow(deprecated)]
fn recovery_cmd() -> Command {
    let mut cmd =
        Command::cargo_bin("campaign-recovery").expect("Failed to find campaign-recovery binary");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Command preset to the JSON store under `dir`.
fn json_cmd(dir: &Path) -> Command {
    let mut cmd = recovery_cmd();
    cmd.arg("--store").arg("json").arg("--path").arg(dir);
    cmd
}

/// Records a campaign with one published platform and one failed attempt.
fn seed_campaign(dir: &Path, campaign: &str, failure: &str) -> String {
    let store = Arc::new(JsonFileStore::new(dir).expect("Failed to open json store"));
    let mut orch = RecoveryOrchestrator::new(store.clone(), store);
    orch.complete_step(
        campaign,
        "publish:alpha",
        SnapshotPatch::new()
            .with_generated_content("body")
            .with_platform("alpha", PlatformProgress::completed("https://alpha/1", 1))
            .with_platform("beta", PlatformProgress::pending()),
    );
    orch.handle_failure(StepFailure::from_message(campaign, "publish:beta", failure))
        .error_id
        .expect("ledger write")
        .to_string()
}

// ============================================================================
// --version / --help
// ============================================================================

#[test]
fn test_version_flag() {
    recovery_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_lists_commands() {
    recovery_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("can-resume"))
        .stdout(predicate::str::contains("classify"));
}

#[test]
fn test_missing_subcommand_fails() {
    recovery_cmd().assert().failure();
}

#[test]
fn test_quiet_and_verbose_conflict() {
    recovery_cmd()
        .args(["-q", "-v", "policy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

// ============================================================================
// policy / classify
// ============================================================================

#[test]
fn test_policy_prints_table() {
    recovery_cmd()
        .arg("policy")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rate_limit\""))
        .stdout(predicate::str::contains("\"max_delay_secs\": 600"));
}

#[test]
fn test_policy_as_toml() {
    recovery_cmd()
        .args(["policy", "--toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[policies.network]"))
        .stdout(predicate::str::contains("max_retries = 5"));
}

#[test]
fn test_policy_respects_config_file() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = temp_dir.path().join("recovery.toml");
    std::fs::write(&config, "[policies.network]\nmax_retries = 9\n").unwrap();

    recovery_cmd()
        .arg("--config")
        .arg(&config)
        .args(["policy", "--toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_retries = 9"));
}

#[test]
fn test_missing_config_file_fails() {
    recovery_cmd()
        .args(["--config", "/nonexistent/recovery.toml", "policy"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_classify_rate_limit() {
    recovery_cmd()
        .args(["classify", "HTTP 429 too many requests"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"rate_limit\""))
        .stdout(predicate::str::contains("\"decision\": \"retry\""));
}

#[test]
fn test_classify_past_ceiling_pauses() {
    recovery_cmd()
        .args(["classify", "401 Unauthorized", "--attempt", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"authentication\""))
        .stdout(predicate::str::contains("\"decision\": \"pause\""));
}

// ============================================================================
// status / errors
// ============================================================================

#[test]
fn test_status_unknown_campaign_is_not_found() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    json_cmd(temp_dir.path())
        .args(["status", "C1"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("no progress recorded"));
}

#[test]
fn test_status_shows_pending_platforms() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    seed_campaign(temp_dir.path(), "C1", "connection reset");

    json_cmd(temp_dir.path())
        .args(["status", "C1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pending_platforms\": [\n    \"beta\"\n  ]"))
        .stdout(predicate::str::contains("https://alpha/1"))
        .stdout(predicate::str::contains("\"error_kind\": \"network\""));
}

#[test]
fn test_errors_summary() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    seed_campaign(temp_dir.path(), "C1", "forbidden");

    json_cmd(temp_dir.path())
        .args(["errors", "C1", "--summary"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total\": 1"))
        .stdout(predicate::str::contains("\"open\": 1"));
}

#[test]
fn test_errors_empty_campaign() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    json_cmd(temp_dir.path())
        .args(["errors", "C1", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

// ============================================================================
// can-resume / resolve
// ============================================================================

#[test]
fn test_can_resume_empty_campaign() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    json_cmd(temp_dir.path())
        .args(["can-resume", "C1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"can_resume\": true"));
}

#[test]
fn test_authentication_error_blocks_until_resolved() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let error_id = seed_campaign(temp_dir.path(), "C1", "401 Unauthorized");

    json_cmd(temp_dir.path())
        .args(["can-resume", "C1"])
        .assert()
        .code(75)
        .stdout(predicate::str::contains("\"can_resume\": false"))
        .stdout(predicate::str::contains("credential"));

    json_cmd(temp_dir.path())
        .args(["resolve", &error_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"resolved\": true"));

    json_cmd(temp_dir.path())
        .args(["resolve", &error_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"resolved\": false"));

    json_cmd(temp_dir.path())
        .args(["can-resume", "C1"])
        .assert()
        .success();
}

#[test]
fn test_resolve_whole_campaign() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    seed_campaign(temp_dir.path(), "C1", "mystery failure");

    json_cmd(temp_dir.path())
        .args(["resolve", "--campaign", "C1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"resolved\": 1"));

    let store = Arc::new(JsonFileStore::new(temp_dir.path()).unwrap());
    let orch = RecoveryOrchestrator::new(store.clone(), store);
    assert!(orch.open_errors("C1").unwrap().is_empty());
    assert!(orch.error_history("C1").unwrap()[0].resolved_at.unwrap() <= Utc::now());
}

#[test]
fn test_resolve_requires_target() {
    recovery_cmd().arg("resolve").assert().failure();
}

#[test]
fn test_resolve_rejects_malformed_id() {
    recovery_cmd()
        .args(["resolve", "not-a-uuid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_resolve_unknown_id_is_not_found() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    json_cmd(temp_dir.path())
        .args(["resolve", "7f0c6f6e-3a51-4d7e-9a0b-2f1d9c1e5b42"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not found"));
}
