//! Loading module catalogs from disk.

use qudi_station::station::{Layer, MissingPolicy, ModuleCatalog};
use std::path::PathBuf;

fn shipped_catalog_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/catalog")
}

#[tokio::test]
async fn shipped_catalog_loads() {
    let mut catalog = ModuleCatalog::new();
    catalog.add_search_path(shipped_catalog_dir());
    let errors = catalog.scan().await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(catalog.len(), 11);

    let process = catalog
        .resolve(Layer::Hardware, "ni_process.NIProcess")
        .expect("NIProcess is described");
    assert!(process.provides("ProcessControlInterface"));
    let minimum = process
        .options
        .iter()
        .find(|o| o.name == "outputMinimum")
        .unwrap();
    assert_eq!(minimum.missing, MissingPolicy::Warn);
    assert_eq!(minimum.default, Some(serde_yaml::Value::from(0.0)));

    let source = catalog.source_of("gui.hbt.hbtgui.HbtGui").unwrap();
    assert!(source.ends_with("gui.yaml"));
}

#[tokio::test]
async fn earlier_search_path_wins() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    tokio::fs::write(
        first.path().join("override.yaml"),
        "classes:\n  - class: logic.hbt_logic.HbtLogic\n    interfaces: [CorrelationInterface]\n",
    )
    .await
    .unwrap();

    let mut catalog = ModuleCatalog::new();
    catalog.add_search_path(first.path());
    catalog.add_search_path(shipped_catalog_dir());
    catalog.add_search_path(second.path());
    assert!(catalog.scan().await.is_empty());

    let hbt = catalog.get("logic.hbt_logic.HbtLogic").unwrap();
    assert!(hbt.provides("CorrelationInterface"));
    assert!(hbt.options.is_empty());
}

#[tokio::test]
async fn bad_files_are_reported_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("a_broken.yaml"), "classes: [unterminated\n")
        .await
        .unwrap();
    tokio::fs::write(
        dir.path().join("b_invalid.yaml"),
        "classes:\n  - class: NoModulePath\n    connectors:\n      - name: x\n        interface: ''\n",
    )
    .await
    .unwrap();
    tokio::fs::write(
        dir.path().join("c_good.yaml"),
        "classes:\n  - class: logic.save_logic.SaveLogic\n",
    )
    .await
    .unwrap();
    tokio::fs::write(dir.path().join("notes.txt"), "not a catalog").await.unwrap();

    let mut catalog = ModuleCatalog::new();
    catalog.add_search_path(dir.path());
    catalog.add_search_path(dir.path().join("does-not-exist"));
    let errors = catalog.scan().await;

    assert_eq!(errors.len(), 2);
    assert!(errors[0].message.contains("Failed to parse YAML"));
    assert_eq!(errors[1].validation_errors.len(), 2);
    assert!(errors[1].to_string().contains("b_invalid.yaml"));
    assert_eq!(catalog.len(), 1);
    assert!(catalog.resolve(Layer::Logic, "save_logic.SaveLogic").is_some());
}
