//! Configuration management for confsync
//!
//! Defaults, a TOML file, or `CONFSYNC_*` environment variables, always
//! validated before use.

use crate::core_crdt::DEFAULT_MAX_MESSAGE_SIZE;
use crate::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Dump database
    pub store: StoreConfig,

    /// Sync behaviour
    pub sync: SyncConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database holding config dumps
    pub db_path: PathBuf,

    /// Maximum pooled connections
    pub pool_size: u32,
}

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Largest encrypted config message accepted by the swarm
    pub max_message_size: usize,

    /// Bound on each transport call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: PathBuf::from("./data/confsync.db"), pool_size: 4 }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_message_size: DEFAULT_MAX_MESSAGE_SIZE, request_timeout: Duration::from_secs(10) }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json_format: false, with_target: true }
    }
}

impl LoggingConfig {
    /// Subscriber settings for `logging::init_logging_with_config`
    pub fn to_log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = LogLevel::from_str(&self.level)
            .map_err(|e| ConfigError::invalid("logging.level", e.to_string()))?;
        Ok(LogConfig {
            level,
            json_format: self.json_format,
            with_target: self.with_target,
            ..LogConfig::default()
        })
    }
}

fn parse_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Environment { name, reason: e.to_string() }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: CONFSYNC_<SECTION>_<KEY>
    /// Example: CONFSYNC_STORE_DB_PATH=/var/lib/confsync/config.db
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Store config
        if let Ok(db_path) = env::var("CONFSYNC_STORE_DB_PATH") {
            config.store.db_path = PathBuf::from(db_path);
        }
        if let Some(pool_size) = parse_var("CONFSYNC_STORE_POOL_SIZE")? {
            config.store.pool_size = pool_size;
        }

        // Sync config
        if let Some(size) = parse_var("CONFSYNC_SYNC_MAX_MESSAGE_SIZE")? {
            config.sync.max_message_size = size;
        }
        if let Ok(timeout) = env::var("CONFSYNC_SYNC_REQUEST_TIMEOUT") {
            config.sync.request_timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::Environment {
                    name: "CONFSYNC_SYNC_REQUEST_TIMEOUT",
                    reason: e.to_string(),
                })?;
        }

        // Logging config
        if let Ok(level) = env::var("CONFSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = parse_var("CONFSYNC_LOG_JSON")? {
            config.logging.json_format = json;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        let config: Self = toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.pool_size == 0 {
            return Err(ConfigError::invalid("store.pool_size", "must be greater than 0"));
        }

        if self.sync.max_message_size == 0 {
            return Err(ConfigError::invalid("sync.max_message_size", "must be greater than 0"));
        }

        if self.sync.request_timeout.is_zero() {
            return Err(ConfigError::invalid("sync.request_timeout", "must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("unknown level {:?}", self.logging.level),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents)
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })?;

        Ok(())
    }
}
