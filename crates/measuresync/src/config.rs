//! Configuration management for measuresync.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sensor::SensorKind;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "measuresync";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "local_measurements.db";

/// Default remote API root.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `MEASURESYNC_`, sections split on `__`)
/// 2. TOML config file at `~/.config/measuresync/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Remote API configuration.
    pub api: ApiConfig,
    /// Sync loop configuration.
    pub sync: SyncConfig,
    /// Sample source configuration.
    pub sensor: SensorConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the buffer database.
    /// Defaults to `~/.local/share/measuresync/local_measurements.db`
    pub database_path: Option<PathBuf>,
}

/// Remote measurement API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Root URL of the API; measurements are posted to `<base_url>measurements/`.
    pub base_url: String,
    /// Timeout for a single delivery request in seconds.
    pub request_timeout_secs: u64,
}

/// Sync loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay between agent cycles in seconds.
    pub interval_secs: u64,
    /// Back off failing records instead of retrying them every pass.
    pub backoff_enabled: bool,
    /// Delay after the first failed attempt in seconds.
    pub initial_backoff_secs: u64,
    /// Upper bound on the per-record delay in seconds.
    pub max_backoff_secs: u64,
}

/// Sample source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Which sample source to use.
    pub kind: SensorKind,
    /// Student reported by the fixed source.
    pub student_id: i64,
    /// Height reported by the fixed source.
    pub height: f64,
    /// Weight reported by the fixed source.
    pub weight: f64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            backoff_enabled: true,
            initial_backoff_secs: 60,
            max_backoff_secs: 3600,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::Fixed,
            student_id: 123,
            height: 170.5,
            weight: 65.3,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("MEASURESYNC_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.sync.interval_secs == 0 {
            return Err(Error::config_validation(
                "interval_secs must be greater than 0",
            ));
        }

        if self.api.request_timeout_secs == 0 {
            return Err(Error::config_validation(
                "request_timeout_secs must be greater than 0",
            ));
        }

        if self.sync.initial_backoff_secs > self.sync.max_backoff_secs {
            return Err(Error::config_validation(format!(
                "initial_backoff_secs ({}) cannot be greater than max_backoff_secs ({})",
                self.sync.initial_backoff_secs, self.sync.max_backoff_secs
            )));
        }

        validate_base_url(&self.api.base_url)?;

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the delay between agent cycles.
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// Get the per-request delivery timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    /// Get the delay after a record's first failed attempt.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.sync.initial_backoff_secs)
    }

    /// Get the upper bound on a record's retry delay.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.sync.max_backoff_secs)
    }

    /// Get how long a sync pass may hold the buffer between deliveries.
    ///
    /// At least twice the request timeout, and never under a minute.
    #[must_use]
    pub fn sync_lease_ttl(&self) -> Duration {
        self.request_timeout()
            .saturating_mul(2)
            .max(Duration::from_secs(60))
    }
}

/// Check that `base_url` is an absolute http(s) URL.
///
/// # Errors
///
/// Returns a validation error describing the problem.
pub fn validate_base_url(base_url: &str) -> Result<()> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|e| Error::config_validation(format!("invalid base_url {base_url:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config_validation(format!(
            "base_url must use http or https, got {:?}",
            url.scheme()
        )));
    }
    Ok(())
}
