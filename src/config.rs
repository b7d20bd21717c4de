use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::engine::trigger::Thresholds;
use crate::error::ConfigError;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_slot_interval_secs() -> u64 {
    60
}

fn default_disarm_above() -> i64 {
    100
}

fn default_rearm_below() -> i64 {
    20
}

fn default_retry_backoff_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub engine: EngineSection,
    /// Alerts go to the log when no webhook is configured.
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_slot_interval_secs")]
    pub slot_interval_secs: u64,
    /// Thousandths of the baseline; an armed token fires above this.
    #[serde(default = "default_disarm_above")]
    pub disarm_above: i64,
    /// Thousandths of the baseline; a disarmed token re-arms below this.
    #[serde(default = "default_rearm_below")]
    pub rearm_below: i64,
    #[serde(default = "default_true")]
    pub rebase_on_disarm: bool,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_true")]
    pub persist_on_stop: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            slot_interval_secs: default_slot_interval_secs(),
            disarm_above: default_disarm_above(),
            rearm_below: default_rearm_below(),
            rebase_on_disarm: true,
            retry_backoff_secs: default_retry_backoff_secs(),
            persist_on_stop: true,
        }
    }
}

impl EngineSection {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            slot_interval: self.slot_interval_secs,
            thresholds: Thresholds {
                disarm_above: self.disarm_above,
                rearm_below: self.rearm_below,
                rebase_on_disarm: self.rebase_on_disarm,
            },
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            persist_on_stop: self.persist_on_stop,
            ..EngineConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub access_token: String,
    /// When false, alerts are logged as JSON instead of posted.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub at_all: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_engine(config)?;
    validate_webhook(config)?;
    Ok(())
}

fn validation(field: String) -> Report<ConfigError> {
    Report::new(ConfigError::Validation { field })
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let format = config.general.log_format.as_str();
    if !VALID_LOG_FORMATS.contains(&format) {
        return Err(validation(format!(
            "general.log_format \"{format}\" must be \"text\" or \"json\""
        )));
    }
    Ok(())
}

fn validate_engine(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let engine = &config.engine;
    if engine.slot_interval_secs == 0 {
        return Err(validation("engine.slot_interval_secs must be > 0".into()));
    }
    if engine.rearm_below <= 0 {
        return Err(validation(format!(
            "engine.rearm_below {} must be > 0",
            engine.rearm_below
        )));
    }
    if engine.rearm_below >= engine.disarm_above {
        return Err(validation(format!(
            "engine.rearm_below {} must be below engine.disarm_above {}",
            engine.rearm_below, engine.disarm_above
        )));
    }
    Ok(())
}

fn validate_webhook(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let Some(webhook) = &config.webhook else {
        return Ok(());
    };
    if !webhook.url.starts_with("http://") && !webhook.url.starts_with("https://") {
        return Err(validation(format!(
            "webhook.url \"{}\" must be an http(s) URL",
            webhook.url
        )));
    }
    if webhook.enabled && webhook.access_token.is_empty() {
        return Err(validation(
            "webhook.access_token is required when webhook.enabled = true".into(),
        ));
    }
    if webhook.timeout_secs == 0 {
        return Err(validation("webhook.timeout_secs must be > 0".into()));
    }
    Ok(())
}
