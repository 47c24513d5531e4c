//! Unit tests for the SettingsEngine: persistence, dot-notation access,
//! validation and reset.

use rstest::rstest;
use serde_json::json;
use tidymarks::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use tidymarks::types::errors::SettingsError;
use tidymarks::types::settings::EngineSettings;

fn engine_in(dir: &tempfile::TempDir) -> SettingsEngine {
    let path = dir.path().join("nested").join("settings.json");
    SettingsEngine::new(Some(path.to_string_lossy().to_string()))
}

#[test]
fn test_set_value_persists_across_engines() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(&dir);
    engine.load().unwrap();
    engine.set_value("search.cache_capacity", json!(8)).unwrap();
    engine.set_value("storage.batch_size", json!(250)).unwrap();

    let mut reopened = engine_in(&dir);
    let loaded = reopened.load().unwrap();
    assert_eq!(loaded.search.cache_capacity, 8);
    assert_eq!(loaded.storage.batch_size, Some(250));
    assert_eq!(reopened.get_value("search.cache_capacity").unwrap(), json!(8));
}

#[test]
fn test_get_value_returns_sections() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(&dir);
    let reconcile = engine.get_value("reconcile").unwrap();
    assert_eq!(reconcile["batch_size"], json!(50));
    assert_eq!(reconcile["settle_delay_ms"], json!(300));
    assert_eq!(engine.get_value("storage.batch_size").unwrap(), json!(null));
}

#[rstest]
#[case("")]
#[case("search.missing")]
#[case("search.cache_capacity.deeper")]
#[case("nope")]
fn test_unknown_keys_are_rejected(#[case] key: &str) {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(&dir);
    assert!(matches!(engine.get_value(key), Err(SettingsError::InvalidKey(_))));
    assert!(matches!(engine.set_value(key, json!(1)), Err(SettingsError::InvalidKey(_))));
}

#[rstest]
#[case("search.default_limit", json!(0))]
#[case("storage.batch_size", json!(0))]
#[case("storage.init_timeout_ms", json!(0))]
#[case("storage.write_retries", json!(-1))]
#[case("reconcile.settle_delay_ms", json!("soon"))]
fn test_invalid_values_leave_settings_untouched(#[case] key: &str, #[case] value: serde_json::Value) {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(&dir);
    let before = engine.get_settings().clone();

    assert!(matches!(engine.set_value(key, value), Err(SettingsError::InvalidValue(_))));
    assert_eq!(engine.get_settings(), &before);
    assert!(!std::path::Path::new(engine.get_config_path()).exists());
}

#[test]
fn test_invalid_file_is_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"reconcile": {"batch_size": 0}}"#).unwrap();

    let mut engine = SettingsEngine::new(Some(path.to_string_lossy().to_string()));
    assert!(matches!(engine.load(), Err(SettingsError::InvalidValue(_))));
}

#[test]
fn test_reset_restores_defaults_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(&dir);
    engine.set_value("search.metadata_scoring", json!(false)).unwrap();
    assert!(!engine.get_settings().search.metadata_scoring);

    engine.reset().unwrap();
    assert_eq!(engine.get_settings(), &EngineSettings::default());

    let mut reopened = engine_in(&dir);
    assert_eq!(reopened.load().unwrap(), EngineSettings::default());
}

#[test]
fn test_with_settings_does_not_touch_disk_until_saved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.json");
    let mut settings = EngineSettings::default();
    settings.reconcile.batch_size = 5;

    let engine = SettingsEngine::with_settings(path.to_string_lossy().to_string(), settings.clone());
    assert!(!path.exists());
    assert_eq!(engine.get_settings(), &settings);

    engine.save().unwrap();
    let mut reopened = SettingsEngine::new(Some(path.to_string_lossy().to_string()));
    assert_eq!(reopened.load().unwrap().reconcile.batch_size, 5);
}
