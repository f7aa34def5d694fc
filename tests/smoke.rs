//! Smoke tests -- verify the binary runs and a scan completes offline.

use assert_cmd::Command;

fn siemsentry(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("siemsentry").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("HF_TOKEN")
        .env_remove("SIEMSENTRY_CONFIG")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("siemsentry")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Agentic SIEM"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("siemsentry")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("siemsentry"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("siemsentry")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_synth_emits_csv() {
    let dir = tempfile::tempdir().unwrap();
    let out = siemsentry(&dir)
        .args(["synth", "--rows", "5"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "device_id,failed_logins,data_transfer_mb");
    assert!(lines[1].starts_with("Device_0,"));
}

#[test]
fn test_offline_scan_on_synthetic_data() {
    let dir = tempfile::tempdir().unwrap();
    siemsentry(&dir)
        .arg("scan")
        .assert()
        .success()
        .stdout(predicates::str::contains("AGENT OFFLINE"))
        .stdout(predicates::str::contains("Detected Threat Samples"))
        .stdout(predicates::str::contains("Device_0"));
}

#[test]
fn test_json_scan_falls_back_when_csv_missing() {
    let dir = tempfile::tempdir().unwrap();
    let out = siemsentry(&dir)
        .args(["scan", "--json", "--csv", "missing.csv"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(report["origin"]["kind"], "synthetic");
    assert_eq!(report["total_records"], 50);
    assert_eq!(report["summary"]["kind"], "offline");
    assert!(report["threats"].as_array().unwrap().len() <= 3);
}

#[test]
fn test_scan_reads_csv_export() {
    let dir = tempfile::tempdir().unwrap();
    let mut csv = String::from("device_id,failed_logins,data_transfer_mb\n");
    for i in 0..30 {
        csv.push_str(&format!("pump-{},{},{}\n", i, i % 4, 100 + i % 7));
    }
    csv.push_str("pump-x,190,9000\n");
    std::fs::write(dir.path().join("devices.csv"), csv).unwrap();

    let out = siemsentry(&dir)
        .args(["scan", "--json", "--csv", "devices.csv"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(report["origin"]["kind"], "source");
    assert_eq!(report["total_records"], 31);
    let threats = report["threats"].as_array().unwrap();
    assert!(threats.iter().any(|t| t["device_id"] == "pump-x"));
}

#[test]
fn test_scan_without_numeric_fields_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("names.csv"), "device_id,ward\na,ICU\nb,ER\n").unwrap();
    siemsentry(&dir)
        .args(["scan", "--csv", "names.csv"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("no numeric fields"));
}
