//! CourierConfig - `courier.toml`.
//!
//! ```toml
//! [store]
//! path = "courier.db"
//!
//! [dispatch]
//! max_retries = 3
//! claim_timeout_secs = 1800
//!
//! [executors.remote-agent]
//! endpoint = "https://agents.internal/run"
//! token_env = "COURIER_REMOTE_TOKEN"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every section is optional. A missing file yields the defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::app::{DEFAULT_RETENTION_DAYS, DispatchSettings};
use crate::domain::{ExecutorType, RetryPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "courier.toml";

const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;
const MAX_RETENTION_DAYS: i64 = 3650;
const MAX_RETRY_BASE_DELAY_SECS: u64 = 3600;
const MAX_RETRY_MULTIPLIER: f64 = 10.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Keyed by executor type name (`code-agent`, `remote-agent`, ...).
    #[serde(default)]
    pub executors: BTreeMap<String, ExecutorConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("courier.db")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    pub max_retries: u32,
    pub batch_size: usize,
    pub claim_timeout_secs: u64,
    pub executor_timeout_secs: u64,
    pub stale_retention_days: i64,
    /// 0 makes retries claimable immediately.
    pub retry_base_delay_secs: u64,
    pub retry_multiplier: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let settings = DispatchSettings::default();
        Self {
            max_retries: settings.max_retries,
            batch_size: settings.batch_size,
            claim_timeout_secs: settings.claim_timeout.as_secs(),
            executor_timeout_secs: settings.executor_timeout.as_secs(),
            stale_retention_days: DEFAULT_RETENTION_DAYS,
            retry_base_delay_secs: 0,
            retry_multiplier: 2.0,
        }
    }
}

impl DispatchConfig {
    pub fn settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_retries: self.max_retries,
            batch_size: self.batch_size,
            claim_timeout: Duration::from_secs(self.claim_timeout_secs),
            executor_timeout: Duration::from_secs(self.executor_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_base_delay_secs == 0 {
            RetryPolicy::immediate()
        } else {
            RetryPolicy::exponential(
                Duration::from_secs(self.retry_base_delay_secs),
                self.retry_multiplier,
            )
        }
    }

    pub fn stale_retention(&self) -> Result<chrono::Duration, ConfigError> {
        chrono::Duration::try_days(self.stale_retention_days)
            .ok_or_else(|| invalid("dispatch.stale_retention_days is out of range"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(invalid("dispatch.max_retries must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("dispatch.batch_size must be at least 1"));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.claim_timeout_secs) {
            return Err(invalid("dispatch.claim_timeout_secs must be between 1 and 604800"));
        }
        if self.executor_timeout_secs == 0 {
            return Err(invalid("dispatch.executor_timeout_secs must be positive"));
        }
        if self.executor_timeout_secs >= self.claim_timeout_secs {
            return Err(invalid(
                "dispatch.executor_timeout_secs must be below dispatch.claim_timeout_secs",
            ));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.stale_retention_days) {
            return Err(invalid("dispatch.stale_retention_days must be between 1 and 3650"));
        }
        if self.retry_base_delay_secs > MAX_RETRY_BASE_DELAY_SECS {
            return Err(invalid("dispatch.retry_base_delay_secs must be at most 3600"));
        }
        if !(1.0..=MAX_RETRY_MULTIPLIER).contains(&self.retry_multiplier) {
            return Err(invalid("dispatch.retry_multiplier must be between 1.0 and 10.0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    pub endpoint: String,
    /// Environment variable holding the bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
}

impl ExecutorConfig {
    pub fn token(&self) -> Result<Option<String>, ConfigError> {
        let Some(var) = self.token_env.as_deref() else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => Ok(Some(token)),
            _ => Err(ConfigError::Invalid(format!(
                "environment variable {var} is not set"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "info" or "courier_core=debug".
    pub level: String,
    pub console: bool,
    pub file: bool,
    /// Log file directory. Defaults to the OS temp dir.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: false,
            directory: None,
        }
    }
}

impl CourierConfig {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatch.validate()?;
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level must not be empty"));
        }
        if !self.logging.console && !self.logging.file {
            return Err(invalid("logging needs console or file output"));
        }
        self.executors().map(|_| ())
    }

    /// Configured executors, with names resolved to executor types.
    pub fn executors(&self) -> Result<Vec<(ExecutorType, &ExecutorConfig)>, ConfigError> {
        self.executors
            .iter()
            .map(|(name, executor)| {
                let executor_type: ExecutorType = name
                    .parse()
                    .map_err(|e| ConfigError::Invalid(format!("executors.{name}: {e}")))?;
                if !executor_type.is_automated() {
                    return Err(ConfigError::Invalid(format!(
                        "executors.{name}: human entries are worked through the CLI"
                    )));
                }
                if executor.endpoint.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "executors.{name}.endpoint is empty"
                    )));
                }
                Ok((executor_type, executor))
            })
            .collect()
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
