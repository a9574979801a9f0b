//! Settings layering: defaults, TOML file, then environment.

use qudi_station::settings::{Settings, ENV_PREFIX};
use serial_test::serial;
use std::path::PathBuf;

const LEVEL_VAR: &str = "QUDI_STATION_APPLICATION__LOG_LEVEL";

fn write_settings(dir: &tempfile::TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("qudi-station.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
#[serial]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_settings(
        &dir,
        r#"
[application]
log_format = "json"

[validation]
strict = true
catalog_paths = ["config/catalog", "/opt/qudi/catalog"]
"#,
    );

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.application.log_level, "info");
    assert_eq!(settings.application.log_format, "json");
    assert!(settings.validation.strict);
    assert_eq!(settings.validation.catalog_paths.len(), 2);
}

#[test]
#[serial]
fn environment_overrides_file() {
    assert!(LEVEL_VAR.starts_with(ENV_PREFIX));
    let dir = tempfile::tempdir().unwrap();
    let path = write_settings(&dir, "[application]\nlog_level = \"warn\"\n");

    std::env::set_var(LEVEL_VAR, "debug");
    let settings = Settings::load_from(&path);
    std::env::remove_var(LEVEL_VAR);

    assert_eq!(settings.unwrap().application.log_level, "debug");
}

#[test]
#[serial]
fn missing_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
#[serial]
fn invalid_values_are_rejected_after_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_settings(&dir, "[application]\nlog_level = \"loud\"\n");
    let err = Settings::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("log_level"));

    let path = write_settings(&dir, "[validation]\nstrict = \"sometimes\"\n");
    assert!(matches!(
        Settings::load_from(&path),
        Err(qudi_station::StationError::Settings(_))
    ));
}
