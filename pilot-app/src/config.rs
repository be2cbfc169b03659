//! Daemon configuration loaded from YAML.

use pilot_observer::ObserverConfig;
use pilot_providers::ProviderSettings;
use pilot_supervisor::{ControllerSettings, PoolConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "pilot.yaml";
pub const ENDPOINT_ENV: &str = "PILOT_LLM_ENDPOINT";
pub const MODEL_ENV: &str = "PILOT_LLM_MODEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file is empty: {0}")]
    Empty(String),
    #[error("Invalid YAML: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub pool: PoolConfig,
    pub controller: ControllerSettings,
    pub observer: ObserverConfig,
    pub provider: ProviderConfig,
    pub cleanup: CleanupConfig,
    pub log: LogConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(flatten)]
    pub settings: ProviderSettings,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            settings: ProviderSettings::default(),
            api_key_env: "PILOT_LLM_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_secs: u64,
    pub max_age_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_age_secs: 3600,
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus listen address, e.g. `127.0.0.1:9100`.
    pub listen: Option<String>,
}

impl PilotConfig {
    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Err(ConfigError::Empty(path.display().to_string()));
        }

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `PILOT_LLM_*` overrides and resolve the API key.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = non_empty(ENDPOINT_ENV) {
            self.provider.settings.base_url = endpoint;
        }
        if let Some(model) = non_empty(MODEL_ENV) {
            self.provider.settings.model = model;
        }
        if let Some(key) = non_empty(&self.provider.api_key_env) {
            self.provider.settings.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.pool.supported_types.is_empty() {
            return Err(ConfigError::Invalid(
                "pool.supported_types must not be empty".to_string(),
            ));
        }
        if self.controller.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "controller.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.controller.cli_command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "controller.cli_command must not be empty".to_string(),
            ));
        }
        if self.controller.buffer_cap_chars < self.observer.context_chars {
            return Err(ConfigError::Invalid(format!(
                "controller.buffer_cap_chars ({}) is smaller than observer.context_chars ({})",
                self.controller.buffer_cap_chars, self.observer.context_chars
            )));
        }
        if self.provider.settings.model.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.model must not be empty".to_string()));
        }
        if self.provider.settings.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "provider.base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
