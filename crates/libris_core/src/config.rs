//! Runtime configuration.
//!
//! # Responsibility
//! - Load `LibrisConfig` from a TOML file with every section defaulted.
//! - Apply environment overrides for secrets.
//! - Reject settings the worker runtime cannot run with.

use crate::logging::{normalize_level, LoggingSettings};
use crate::model::delivery_job::RetryPolicy;
use crate::service::delivery::DeliveryOptions;
use crate::transport::telegram::DEFAULT_API_BASE;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `telegram.bot_token`.
pub const BOT_TOKEN_ENV: &str = "LIBRIS_BOT_TOKEN";

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config syntax: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibrisConfig {
    pub database: DatabaseSection,
    pub logging: LoggingSettings,
    pub delivery: DeliverySection,
    pub telegram: TelegramSection,
    pub sweeper: SweeperSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    pub path: PathBuf,
    /// Connection attempts before giving up at startup.
    pub connect_attempts: u32,
    pub connect_retry_ms: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("libris.sqlite3"),
            connect_attempts: 30,
            connect_retry_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeliverySection {
    /// Total attempts per notification, the first one included.
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub send_timeout_secs: u64,
    pub claim_lease_secs: u64,
    pub batch_size: u32,
    pub workers: usize,
    pub poll_interval_ms: u64,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 60,
            send_timeout_secs: 5,
            claim_lease_secs: 300,
            batch_size: 16,
            workers: 4,
            poll_interval_ms: 1000,
        }
    }
}

impl DeliverySection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelegramSection {
    pub api_base: String,
    pub bot_token: String,
    pub admin_chat_ids: Vec<String>,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            bot_token: String::new(),
            admin_chat_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweeperSection {
    pub interval_secs: u64,
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 60 * 60,
        }
    }
}

impl SweeperSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl LibrisConfig {
    /// Reads `path`, applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without consulting the environment or validating.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.telegram.bot_token = token.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(invalid("database.path must not be empty"));
        }
        if self.database.connect_attempts == 0 {
            return Err(invalid("database.connect_attempts must be >= 1"));
        }
        normalize_level(&self.logging.level).map_err(ConfigError::Invalid)?;

        let delivery = &self.delivery;
        if delivery.max_attempts == 0 {
            return Err(invalid("delivery.max_attempts must be >= 1"));
        }
        if delivery.send_timeout_secs == 0 {
            return Err(invalid("delivery.send_timeout_secs must be >= 1"));
        }
        let recipients =
            u64::try_from(self.telegram.admin_chat_ids.len().max(1)).unwrap_or(u64::MAX);
        let attempt_ceiling = delivery.send_timeout_secs.saturating_mul(recipients);
        if delivery.claim_lease_secs <= attempt_ceiling {
            return Err(ConfigError::Invalid(format!(
                "delivery.claim_lease_secs ({}) must exceed send_timeout_secs x admin recipients ({attempt_ceiling})",
                delivery.claim_lease_secs
            )));
        }
        if delivery.batch_size == 0 || delivery.workers == 0 || delivery.poll_interval_ms == 0 {
            return Err(invalid(
                "delivery.batch_size, delivery.workers and delivery.poll_interval_ms must be >= 1",
            ));
        }

        if self.telegram.api_base.trim().is_empty() {
            return Err(invalid("telegram.api_base must not be empty"));
        }
        if self
            .telegram
            .admin_chat_ids
            .iter()
            .any(|chat_id| chat_id.trim().is_empty())
        {
            return Err(invalid("telegram.admin_chat_ids must not contain blank ids"));
        }
        if !self.telegram.admin_chat_ids.is_empty() && self.telegram.bot_token.trim().is_empty() {
            return Err(invalid(&format!(
                "telegram.bot_token (or {BOT_TOKEN_ENV}) is required when admin_chat_ids is set"
            )));
        }

        if self.sweeper.interval_secs == 0 {
            return Err(invalid("sweeper.interval_secs must be >= 1"));
        }
        Ok(())
    }

    pub fn delivery_options(&self) -> DeliveryOptions {
        DeliveryOptions {
            policy: self.delivery.retry_policy(),
            claim_lease: Duration::from_secs(self.delivery.claim_lease_secs),
            recipients: self
                .telegram
                .admin_chat_ids
                .iter()
                .map(|chat_id| chat_id.trim().to_string())
                .collect(),
        }
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
