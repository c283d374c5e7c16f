//! Smoke tests -- verify the binary runs and the subcommands are wired.

use assert_cmd::Command;
use predicates::prelude::*;

fn solarwatch() -> Command {
    let mut cmd = Command::cargo_bin("solarwatch").unwrap();
    cmd.env_remove("SOLARWATCH_CONFIG");
    cmd
}

#[test]
fn test_cli_help() {
    solarwatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fleet anomaly detection"));
}

#[test]
fn test_cli_version() {
    solarwatch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("solarwatch"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "detect", "findings", "schedule-preview", "import", "config"] {
        solarwatch().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_config_prints_defaults() {
    solarwatch()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("cron = \"0 15 * * * *\""))
        .stdout(predicate::str::contains("[detection.sudden_drop]"));
}

#[test]
fn test_schedule_preview_lists_hourly_runs() {
    solarwatch()
        .args(["schedule-preview", "--hours", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Upcoming fleet passes"));
}

#[test]
fn test_import_detect_and_list() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("fleet.db");
    let config = dir.path().join("solarwatch.toml");
    std::fs::write(
        &config,
        format!("[storage]\ndb_path = {:?}\n", db.display().to_string()),
    )
    .unwrap();

    let fleet = dir.path().join("fleet.json");
    std::fs::write(
        &fleet,
        r#"{
            "users": [{ "id": "u1" }],
            "devices": [{ "id": "d1", "user_id": "u1", "serial_number": "SN-1",
                          "capacity_watts": 5000.0, "status": "ACTIVE" }],
            "readings": []
        }"#,
    )
    .unwrap();

    solarwatch()
        .arg("--config")
        .arg(&config)
        .args(["import", "--file"])
        .arg(&fleet)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 users, 1 devices"));

    solarwatch()
        .arg("--config")
        .arg(&config)
        .args(["detect", "--device", "d1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"skipped_no_data\": true"));

    solarwatch()
        .arg("--config")
        .arg(&config)
        .args(["findings", "--user", "u1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No findings."));

    solarwatch()
        .arg("--config")
        .arg(&config)
        .args(["detect", "--device", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("device not found"));
}
