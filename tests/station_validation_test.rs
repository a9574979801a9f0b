//! Validation of the station files shipped under `config/stations`.

use anyhow::Result;
use qudi_station::station::{self, ModuleCatalog, Validator};
use qudi_station::{DiagnosticCode, Severity};
use std::path::PathBuf;

fn fixture(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join(relative)
}

async fn shipped_catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog.add_search_path(fixture("catalog"));
    let errors = catalog.scan().await;
    assert!(errors.is_empty(), "catalog errors: {:?}", errors);
    catalog
}

#[tokio::test]
async fn every_connect_target_exists() -> Result<()> {
    for name in ["stations/warwick_rt_confocal.cfg", "stations/dummy.cfg"] {
        let station = station::load_file(fixture(name)).await?;
        for module in &station.modules {
            for connection in &module.connect {
                assert!(
                    station.contains(&connection.target.instance),
                    "{name}: {}.{} -> {}",
                    module.name,
                    connection.role,
                    connection.target.instance
                );
            }
        }
        let report = Validator::new().validate(&station);
        assert!(report.with_code(DiagnosticCode::UnknownTarget).is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn niprocess_duplicate_class_is_flagged() -> Result<()> {
    let station = station::load_file(fixture("stations/warwick_rt_confocal.cfg")).await?;

    let niprocess = station.module("niprocess").expect("niprocess is declared");
    assert_eq!(niprocess.class.as_deref(), Some("ni_process.NIProcess"));
    assert_eq!(niprocess.options.get("name").and_then(|v| v.as_str()), Some("aom"));

    let report = Validator::new().validate(&station);
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1, "{report}");
    assert_eq!(errors[0].code, DiagnosticCode::DuplicateClass);
    assert_eq!(errors[0].module.as_deref(), Some("niprocess"));
    assert_eq!(errors[0].line, Some(50));
    assert!(!report.is_clean(false));
    Ok(())
}

#[tokio::test]
async fn every_other_block_has_one_class() -> Result<()> {
    let station = station::load_file(fixture("stations/warwick_rt_confocal.cfg")).await?;
    let class_duplicates: Vec<_> = station
        .duplicate_keys
        .iter()
        .filter(|d| d.key() == station::CLASS_KEY)
        .collect();
    assert_eq!(class_duplicates.len(), 1);
    assert_eq!(class_duplicates[0].lines, vec![44, 50]);
    assert!(station.modules.iter().all(|m| m.class.is_some()));
    Ok(())
}

#[tokio::test]
async fn catalog_checks_on_warwick_station() -> Result<()> {
    let catalog = shipped_catalog().await;
    let station = station::load_file(fixture("stations/warwick_rt_confocal.cfg")).await?;
    let report = Validator::new().with_catalog(&catalog).validate(&station);

    let error_codes: Vec<_> = report.errors().map(|d| d.code).collect();
    assert_eq!(error_codes, vec![DiagnosticCode::DuplicateClass], "{report}");

    let mut missing: Vec<(String, String)> = report
        .with_code(DiagnosticCode::MissingOption)
        .iter()
        .map(|d| {
            assert_eq!(d.severity, Severity::Warning);
            let option = d.message.split('\'').nth(1).unwrap_or_default().to_string();
            (d.module.clone().unwrap_or_default(), option)
        })
        .collect();
    missing.sort();
    assert_eq!(
        missing,
        vec![
            ("anc300".to_string(), "lua_port".to_string()),
            ("anc300".to_string(), "password".to_string()),
            ("tagger".to_string(), "fast_detect".to_string()),
        ]
    );

    let mut unknown: Vec<_> = report
        .with_code(DiagnosticCode::UnknownClass)
        .iter()
        .filter_map(|d| d.module.clone())
        .collect();
    unknown.sort();
    assert_eq!(unknown, vec!["counterlogic", "man", "mynicard", "savelogic", "tray"]);

    assert!(report.with_code(DiagnosticCode::InterfaceMismatch).is_empty());
    assert!(report.with_code(DiagnosticCode::Unconnected).is_empty());
    Ok(())
}

#[tokio::test]
async fn dummy_station_is_clean_even_when_strict() -> Result<()> {
    let catalog = shipped_catalog().await;
    let station = station::load_file(fixture("stations/dummy.cfg")).await?;

    let plain = Validator::new().validate(&station);
    assert!(plain.diagnostics().is_empty(), "{plain}");

    let with_catalog = Validator::new().with_catalog(&catalog).validate(&station);
    assert!(with_catalog.is_clean(true), "{with_catalog}");
    assert!(with_catalog
        .diagnostics()
        .iter()
        .all(|d| d.severity == Severity::Info));
    Ok(())
}

#[tokio::test]
async fn report_serializes_to_json() -> Result<()> {
    let station = station::load_file(fixture("stations/warwick_rt_confocal.cfg")).await?;
    let report = Validator::new().validate(&station);
    let json = serde_json::to_value(&report)?;

    assert!(json["origin"]
        .as_str()
        .is_some_and(|o| o.ends_with("warwick_rt_confocal.cfg")));
    let first = &json["diagnostics"][0];
    assert_eq!(first["code"], "duplicate-class");
    assert_eq!(first["severity"], "error");
    assert_eq!(first["line"], 50);
    Ok(())
}

#[tokio::test]
async fn missing_station_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = station::load_file(dir.path().join("absent.cfg"))
        .await
        .unwrap_err();
    assert!(matches!(err, qudi_station::StationError::Io(_)));
}
