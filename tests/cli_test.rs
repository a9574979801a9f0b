//! End-to-end runs of the `qudi-station` binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn repo_file(relative: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join(relative)
        .display()
        .to_string()
}

/// Run the binary in `dir` so no settings file or log override leaks in.
fn qudi_station(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_qudi-station"))
        .args(["--log-level", "error"])
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("binary runs")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn validate_fails_on_errors_and_passes_clean_stations() {
    let dir = tempfile::tempdir().unwrap();

    let warwick = qudi_station(
        dir.path(),
        &["validate", &repo_file("config/stations/warwick_rt_confocal.cfg")],
    );
    assert_eq!(warwick.status.code(), Some(1));
    let text = stdout(&warwick);
    assert!(text.contains("error[duplicate-class] niprocess"), "{text}");
    assert!(text.contains("1 error(s)"), "{text}");

    let dummy = qudi_station(
        dir.path(),
        &["validate", "--strict", &repo_file("config/stations/dummy.cfg")],
    );
    assert_eq!(dummy.status.code(), Some(0));
    assert!(stdout(&dummy).contains("0 error(s), 0 warning(s)"));
}

#[test]
fn warnings_fail_only_in_strict_mode() {
    let dir = tempfile::tempdir().unwrap();
    let station = dir.path().join("extras.cfg");
    std::fs::write(
        &station,
        "extras:\n    note: 1\nlogic:\n    savelogic:\n        module.Class: 'save_logic.SaveLogic'\n",
    )
    .unwrap();
    let station = station.display().to_string();

    let relaxed = qudi_station(dir.path(), &["validate", &station]);
    assert_eq!(relaxed.status.code(), Some(0));
    assert!(stdout(&relaxed).contains(":1: warning[unknown-section]"));

    let strict = qudi_station(dir.path(), &["validate", "--strict", &station]);
    assert_eq!(strict.status.code(), Some(1));
}

#[test]
fn validate_json_lists_one_report_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let output = qudi_station(
        dir.path(),
        &[
            "validate",
            "--format",
            "json",
            &repo_file("config/stations/dummy.cfg"),
            &repo_file("config/stations/warwick_rt_confocal.cfg"),
        ],
    );
    assert_eq!(output.status.code(), Some(1));
    let reports: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports[1]["diagnostics"]
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d["code"] == "duplicate-class" && d["line"] == 50));
}

#[test]
fn order_with_root_prints_its_chain() {
    let dir = tempfile::tempdir().unwrap();
    let output = qudi_station(
        dir.path(),
        &[
            "order",
            &repo_file("config/stations/warwick_rt_confocal.cfg"),
            "--root",
            "stepper",
        ],
    );
    assert!(output.status.success());
    assert_eq!(
        stdout(&output).lines().collect::<Vec<_>>(),
        vec!["anc300", "stepperlogic", "stepper"]
    );
}

#[test]
fn dependents_of_known_and_unknown_modules() {
    let dir = tempfile::tempdir().unwrap();
    let config = repo_file("config/stations/warwick_rt_confocal.cfg");

    let known = qudi_station(dir.path(), &["dependents", &config, "savelogic"]);
    assert!(known.status.success());
    assert_eq!(
        stdout(&known).lines().collect::<Vec<_>>(),
        vec!["aomlogic", "counterlogic", "hbt", "hbtlogic"]
    );

    let unknown = qudi_station(dir.path(), &["dependents", &config, "nosuchmodule"]);
    assert!(!unknown.status.success());
    assert!(stdout(&unknown).is_empty());
    assert!(String::from_utf8_lossy(&unknown.stderr).contains("'nosuchmodule' is not declared"));
}

#[test]
fn framed_hex_sequence_compiles_and_inspects() {
    let dir = tempfile::tempdir().unwrap();
    let encoded = dir.path().join("odmr.hex");
    let encoded_arg = encoded.display().to_string();

    let compile = qudi_station(
        dir.path(),
        &[
            "pulse",
            "compile",
            &repo_file("config/sequences/odmr_gate.yaml"),
            "--framed",
            "--hex",
            "--out",
            &encoded_arg,
        ],
    );
    assert!(compile.status.success());

    let text = std::fs::read_to_string(&encoded).unwrap();
    let bytes = hex::decode(text.trim()).unwrap();
    assert_eq!(bytes[0], 0);
    let length = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    assert_eq!(length, bytes.len() - 5);

    let inspect = qudi_station(
        dir.path(),
        &["pulse", "inspect", "--framed", "--hex", &encoded_arg],
    );
    assert!(inspect.status.success());
    let summary: serde_json::Value = serde_json::from_str(&stdout(&inspect)).unwrap();
    assert_eq!(summary["total_ticks"], 4000);
    assert_eq!(summary["pulses"], 5);
    assert_eq!(summary["runs"], "infinite");

    // The frame header is not a valid message on its own
    let unframed = qudi_station(dir.path(), &["pulse", "inspect", "--hex", &encoded_arg]);
    assert!(!unframed.status.success());
}
