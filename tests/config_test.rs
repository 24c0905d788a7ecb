//! Tests for config loading

use serial_test::serial;
use std::path::Path;

use iotkg::config::{PipelineConfig, PlatformConfig};
use iotkg::error::ErrorCategory;
use iotkg::generator::EngineKind;
use iotkg::Error;

const ENV_KEYS: [&str; 4] = ["IOTKG_ENGINE", "IOTKG_LLM_ENABLED", "IOTKG_LLM_ENDPOINT", "IOTKG_LOG_FORMAT"];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn test_config_file_exists() {
    let config_path = Path::new("config.toml");
    assert!(config_path.exists(), "config.toml should exist in project root");
}

#[test]
fn test_config_toml_readable() {
    let content = std::fs::read_to_string("config.toml").expect("Should be able to read config.toml");

    for section in ["[llm]", "[embedding]", "[engine]", "[synthesizer]", "[logging]"] {
        assert!(content.contains(section), "config.toml should have {section} section");
    }
}

#[test]
fn test_config_toml_matches_defaults() {
    let config = PipelineConfig::from_file(Path::new("config.toml")).unwrap();
    config.validate().unwrap();

    let defaults = PipelineConfig::default();
    assert_eq!(config.engine, defaults.engine);
    assert_eq!(config.synthesizer, defaults.synthesizer);
    assert_eq!(config.llm.model, defaults.llm.model);
    assert_eq!(config.llm.rate_limit_pause_ms, 61_000);
    assert!(!config.llm.enabled);
}

#[test]
fn test_invalid_toml_is_a_config_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[engine\nkind = ").unwrap();

    let err = PipelineConfig::from_file(&path).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(err.artifact().contains("broken.toml"));
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    std::env::set_var("IOTKG_ENGINE", "native");
    std::env::set_var("IOTKG_LLM_ENABLED", "yes");
    std::env::set_var("IOTKG_LLM_ENDPOINT", "http://gpu-box:11434");

    let config = PipelineConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.engine.kind, EngineKind::Native);
    assert!(config.llm.enabled);
    assert_eq!(config.llm.endpoint, "http://gpu-box:11434");
}

#[test]
#[serial]
fn test_env_rejects_unknown_engine() {
    clear_env();
    std::env::set_var("IOTKG_ENGINE", "rmlmapper");

    let result = PipelineConfig::from_env();
    clear_env();

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
    assert!(err.to_string().contains("rmlmapper"));
}

#[test]
#[serial]
fn test_load_validates_env_values() {
    clear_env();
    std::env::set_var("IOTKG_LOG_FORMAT", "xml");

    let result = PipelineConfig::load(None);
    clear_env();

    assert!(result.is_err());
}

#[test]
fn test_platform_config_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("platform.json");
    std::fs::write(
        &path,
        r#"{
            "unique_identifier_key": "name",
            "entity_type_keys": ["category", "type"],
            "patterns_splitting": ["$[*].fanSpeed"],
            "similarity_thresholds": {"low": 0.4, "high": 0.9}
        }"#,
    )
    .unwrap();

    let config = PlatformConfig::from_file(&path).unwrap();
    assert_eq!(config.unique_identifier_key, "name");
    assert_eq!(config.similarity_thresholds.high, 0.9);
    assert_eq!(config.top_k, 5);
    assert_eq!(config.splitting_patterns().unwrap().len(), 1);

    std::fs::write(&path, r#"{"similarity_thresholds": {"low": 0.9, "high": 0.4}}"#).unwrap();
    assert!(PlatformConfig::from_file(&path).is_err());
}
