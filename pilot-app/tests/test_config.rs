#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use pilot_app::config::{ConfigError, PilotConfig};
use pilot_core::AgentType;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_missing_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = PilotConfig::load(temp_dir.path().join("absent.yaml")).unwrap();
    assert_eq!(config.pool.max_concurrent, 5);
    assert_eq!(config.controller.poll_interval_ms, 2_000);
    assert_eq!(config.observer.context_chars, 4_000);
}

#[test]
fn test_empty_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("pilot.yaml");
    fs::write(&path, "   \n").unwrap();

    assert!(matches!(PilotConfig::load(&path), Err(ConfigError::Empty(_))));
}

#[test]
fn test_invalid_yaml_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("pilot.yaml");
    fs::write(&path, "pool: [not, a, map]\n").unwrap();

    assert!(matches!(PilotConfig::load(&path), Err(ConfigError::Parse(_))));
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("pilot.yaml");
    fs::write(
        &path,
        "pool:\n  max_concurrent: 2\ncontroller:\n  cli_command: claude --verbose\n  poll_interval_ms: 500\nprovider:\n  model: local-model\n  base_url: http://localhost:8080/v1\n",
    )
    .unwrap();

    let config = PilotConfig::load(&path).unwrap();
    assert_eq!(config.pool.max_concurrent, 2);
    assert_eq!(config.pool.supported_types, vec![AgentType::ClaudeCode]);
    assert_eq!(config.controller.cli_command, "claude --verbose");
    assert_eq!(config.controller.poll_interval_ms, 500);
    assert_eq!(config.controller.startup_timeout_ms, 60_000);
    assert_eq!(config.provider.settings.model, "local-model");
    assert_eq!(config.provider.settings.base_url, "http://localhost:8080/v1");
    assert_eq!(config.provider.settings.max_retries, 2);
    assert_eq!(config.provider.api_key_env, "PILOT_LLM_API_KEY");
    assert!(config.validate().is_ok());
}

#[test]
fn test_unknown_agent_type_in_config_fails_to_parse() {
    let result = PilotConfig::from_yaml("pool:\n  supported_types: [aider]\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_shipped_example_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("pilot.example.yaml");
    let config = PilotConfig::load(&path).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.controller.exit_command, "exit\r");
    assert!(config.metrics.listen.is_none());
}
