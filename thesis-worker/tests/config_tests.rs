//! Configuration resolution tests
//!
//! API keys resolve Database → ENV → TOML. Tests touching the key
//! environment variables are marked #[serial].

use serial_test::serial;
use std::io::Write;
use thesis_common::config::{load_toml_config, TomlConfig};
use thesis_worker::config::{resolve_api_key, ApiKeyKind, WorkerConfig};
use thesis_worker::db;
use thesis_worker::db::settings::set_setting;
use thesis_worker::models::LengthUnit;

fn toml_with_keys(generation: Option<&str>, detector: Option<&str>) -> TomlConfig {
    TomlConfig {
        generation_api_key: generation.map(str::to_string),
        detector_api_key: detector.map(str::to_string),
        ..TomlConfig::default()
    }
}

#[tokio::test]
#[serial]
async fn test_database_overrides_env_and_toml() {
    let pool = db::init_memory_pool().await.unwrap();
    set_setting(&pool, ApiKeyKind::Generation.setting_key(), "db-key")
        .await
        .unwrap();
    std::env::set_var(ApiKeyKind::Generation.env_var(), "env-key");

    let key = resolve_api_key(&pool, &toml_with_keys(Some("toml-key"), None), ApiKeyKind::Generation)
        .await
        .unwrap();
    assert_eq!(key.as_deref(), Some("db-key"));

    std::env::remove_var(ApiKeyKind::Generation.env_var());
}

#[tokio::test]
#[serial]
async fn test_env_overrides_toml() {
    let pool = db::init_memory_pool().await.unwrap();
    std::env::set_var(ApiKeyKind::Detector.env_var(), "env-key");

    let key = resolve_api_key(&pool, &toml_with_keys(None, Some("toml-key")), ApiKeyKind::Detector)
        .await
        .unwrap();
    assert_eq!(key.as_deref(), Some("env-key"));

    std::env::remove_var(ApiKeyKind::Detector.env_var());
}

#[tokio::test]
#[serial]
async fn test_blank_keys_are_skipped() {
    let pool = db::init_memory_pool().await.unwrap();
    set_setting(&pool, ApiKeyKind::Generation.setting_key(), "   ")
        .await
        .unwrap();
    std::env::remove_var(ApiKeyKind::Generation.env_var());

    let key = resolve_api_key(&pool, &toml_with_keys(Some("toml-key"), None), ApiKeyKind::Generation)
        .await
        .unwrap();
    assert_eq!(key.as_deref(), Some("toml-key"));
}

#[tokio::test]
#[serial]
async fn test_missing_detector_key_resolves_to_none() {
    let pool = db::init_memory_pool().await.unwrap();
    std::env::remove_var(ApiKeyKind::Detector.env_var());

    let key = resolve_api_key(&pool, &TomlConfig::default(), ApiKeyKind::Detector)
        .await
        .unwrap();
    assert!(key.is_none());
}

#[test]
fn test_pipeline_table_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
port = 5800

[logging]
level = "debug"

[pipeline]
repair_iterations = 5
words_per_page = 250
max_concurrent_jobs = 2
"#
    )
    .unwrap();

    let toml_config = load_toml_config(file.path()).unwrap();
    assert_eq!(toml_config.port, Some(5800));
    assert_eq!(toml_config.logging.level, "debug");

    let config = WorkerConfig::from_toml(&toml_config).unwrap();
    assert_eq!(config.repair_iterations, 5);
    assert_eq!(config.words_per_page, 250);
    assert_eq!(config.max_concurrent_jobs, 2);
    assert_eq!(config.acquisition_workers, WorkerConfig::default().acquisition_workers);
}

#[test]
fn test_wrongly_typed_pipeline_value_rejected() {
    let toml_config: TomlConfig = toml::from_str(
        r#"
        [pipeline]
        repair_iterations = "many"
        "#,
    )
    .unwrap();
    assert!(WorkerConfig::from_toml(&toml_config).is_err());
}

#[test]
fn test_page_targets_convert_to_words() {
    let mut spec = minimal_spec();
    spec.length_unit = LengthUnit::Pages;
    spec.target_length = 40;

    let config = WorkerConfig::default();
    assert_eq!(spec.target_word_count(config.words_per_page), 12_000);
    assert_eq!(config.source_target(spec.target_word_count(config.words_per_page)), 36);
}

fn minimal_spec() -> thesis_worker::models::ThesisSpec {
    serde_json::from_value(serde_json::json!({
        "title": "Remote Work",
        "citationStyle": "harvard",
        "targetLength": 1000,
        "outline": [{"id": "1", "title": "Introduction"}]
    }))
    .unwrap()
}
