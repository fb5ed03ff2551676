use serde::Deserialize;
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::observer::{Backoff, Cursor, HorizonConfig, ObserverConfig, SaveFailurePolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for the checkpoint row and recorded payments
    pub postgres_url: String,
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub observer: ObserverSettings,
}

/// Horizon endpoint settings
#[derive(Debug, Deserialize, Clone)]
pub struct LedgerSettings {
    pub horizon_url: String,
    /// Account whose incoming payments are recorded
    pub account: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ObserverSettings {
    /// Used only when no checkpoint exists; absent means the ledger head
    pub start_cursor: Option<String>,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: u32,
    /// 0 disables the read timeout
    pub read_timeout_ms: u64,
    pub save_failure_policy: SaveFailurePolicy,
}

fn default_page_limit() -> u32 {
    100
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            start_cursor: None,
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2,
            read_timeout_ms: 300_000,
            save_failure_policy: SaveFailurePolicy::Escalate,
        }
    }
}

impl ObserverSettings {
    pub fn to_observer_config(&self) -> ObserverConfig {
        ObserverConfig {
            start_cursor: self.start_cursor.clone().map(Cursor::from),
            max_retries: self.max_retries,
            backoff: Backoff::new(
                Duration::from_millis(self.initial_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
                self.backoff_multiplier,
            ),
            read_timeout: (self.read_timeout_ms > 0)
                .then(|| Duration::from_millis(self.read_timeout_ms)),
            save_failure_policy: self.save_failure_policy,
        }
    }
}

impl LedgerSettings {
    pub fn to_horizon_config(&self) -> HorizonConfig {
        HorizonConfig {
            url: self.horizon_url.clone(),
            account: Some(self.account.clone()),
            page_limit: self.page_limit,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.observer.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "observer.max_retries must be at least 1".into(),
            ));
        }
        if self.observer.initial_backoff_ms > self.observer.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "observer.initial_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        if self.ledger.page_limit == 0 || self.ledger.page_limit > 200 {
            return Err(ConfigError::Invalid(
                "ledger.page_limit must be within 1..=200".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
log_level: "info"
log_dir: "./logs"
log_file: "observer.log"
use_json: false
rotation: "daily"
postgres_url: "postgres://localhost/observer"
ledger:
  horizon_url: "https://horizon-testnet.stellar.org"
  account: "GANCHOR"
  poll_interval_ms: 2000
observer:
  start_cursor: "0"
  max_retries: 3
  initial_backoff_ms: 100
  max_backoff_ms: 1000
  backoff_multiplier: 2
  read_timeout_ms: 0
  save_failure_policy: best_effort
"#;

    #[test]
    fn test_app_config_deserialize() {
        let config = AppConfig::from_yaml(YAML).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.ledger.account, "GANCHOR");
        assert_eq!(config.ledger.page_limit, 100);
        assert_eq!(config.observer.max_retries, 3);
        assert_eq!(
            config.observer.save_failure_policy,
            SaveFailurePolicy::BestEffort
        );
    }

    #[test]
    fn test_observer_settings_conversion() {
        let config = AppConfig::from_yaml(YAML).unwrap();
        let observer = config.observer.to_observer_config();
        assert_eq!(observer.start_cursor, Some(Cursor::new("0")));
        assert_eq!(observer.read_timeout, None);
        assert_eq!(observer.backoff.delay(1), Duration::from_millis(100));
        assert_eq!(observer.backoff.delay(10), Duration::from_millis(1000));

        let horizon = config.ledger.to_horizon_config();
        assert_eq!(horizon.account.as_deref(), Some("GANCHOR"));
        assert_eq!(horizon.poll_interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_observer_section_defaults() {
        let yaml = r#"
log_level: "debug"
log_dir: "./logs"
log_file: "observer.log"
use_json: true
rotation: "never"
postgres_url: "postgres://localhost/observer"
ledger:
  horizon_url: "http://localhost:8000"
  account: "GANCHOR"
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.observer.max_retries, 10);
        assert_eq!(config.observer.start_cursor, None);
        assert_eq!(
            config.observer.to_observer_config().read_timeout,
            Some(Duration::from_millis(300_000))
        );
    }

    #[test]
    fn test_rejects_zero_retry_budget() {
        let yaml = YAML.replace("max_retries: 3", "max_retries: 0");
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::from_file("config/does-not-exist.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
