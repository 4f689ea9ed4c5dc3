//! End-to-end tests of the mmsim binary

use assert_cmd::Command;
use predicates::prelude::*;

fn mmsim() -> Command {
    let mut cmd = Command::cargo_bin("mmsim").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("MM_AGGRESSIVE_GC")
        .env_remove("MM_GC_TIMELIMIT");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    mmsim()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("stress"));
}

#[test]
fn test_run_prints_human_report() {
    mmsim()
        .args(["run", "--objects", "2000", "--rounds", "3", "--min-chunks", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allocated:        12000 objects in 3 rounds"))
        .stdout(predicate::str::contains("cycles:"))
        .stdout(predicate::str::contains("step pauses:"));
}

#[test]
fn test_run_json_report() {
    let output = mmsim()
        .args([
            "run", "--objects", "1000", "--rounds", "4", "--retain", "0", "--budget-us", "50",
            "--json", "--seed", "3",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["objects_allocated"], 8000);
    assert_eq!(report["live_objects"], 0);
    assert!(report["statistics"]["cycles"].as_u64().unwrap() >= 1);
    assert!(report["statistics"]["step_pauses"]["count"].is_u64());
}

#[test]
fn test_run_aggressive_stop_the_world() {
    mmsim()
        .args([
            "run", "--objects", "200", "--rounds", "2", "--budget-us", "0", "--aggressive", "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cycles\""));
}

#[test]
fn test_retain_out_of_range_rejected() {
    mmsim()
        .args(["run", "--retain", "150"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("150"));
}

#[test]
fn test_zero_objects_rejected() {
    mmsim()
        .args(["run", "--objects", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--objects must be positive"));
}

#[test]
fn test_stress_passes() {
    mmsim()
        .args(["stress", "--iterations", "3000", "--seed", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stress: 3000 iterations, seed 42"))
        .stdout(predicate::str::ends_with("ok\n"));
}
