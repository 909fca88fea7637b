use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::Value;

use hybrid_upgrader::error::UpgradeError;
use hybrid_upgrader::settings::{JsonSettingsStore, PipelineConfig, SETTINGS_KEY, SettingsStore};

fn store_in(dir: &tempfile::TempDir) -> JsonSettingsStore {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("nested").join("settings.json")).unwrap();
    JsonSettingsStore::new_with_path(path)
}

#[test]
fn missing_file_loads_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    assert_eq!(store.load().unwrap(), None);
}

#[test]
fn save_then_load_returns_equal_record() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    let config = PipelineConfig {
        root_path: "/work/news".into(),
        cache_path: "/tmp/hb".into(),
        auto_unzip: true,
        auto_replace: true,
        auto_commit: false,
        asset_subpath: "app/src/main/assets/h5".to_string(),
    };

    store.save(&config).unwrap();

    assert_eq!(store.load().unwrap(), Some(config));
}

#[test]
fn record_is_stored_under_its_key_next_to_other_records() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    fs::write(store.path(), r#"{"window": {"width": 800}}"#).unwrap();

    store.save(&PipelineConfig::default()).unwrap();

    let document: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(document["window"]["width"], 800);
    assert_eq!(document[SETTINGS_KEY]["autoCommit"], true);
    assert_eq!(document[SETTINGS_KEY]["rootPath"], "");
}

#[test]
fn loaded_toggles_are_normalized() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    fs::write(
        store.path(),
        r#"{"hybrid": {"rootPath": "/w", "cachePath": "/c",
            "autoUnzip": false, "autoReplace": true, "autoCommit": true}}"#,
    )
    .unwrap();

    let config = store.load().unwrap().unwrap();

    assert!(!config.auto_unzip && !config.auto_replace && !config.auto_commit);
    assert!(config.satisfies_toggle_rules());
}

#[test]
fn corrupt_document_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    fs::write(store.path(), "{ not json").unwrap();

    assert_matches!(store.load(), Err(UpgradeError::SettingsParse(_)));
}
