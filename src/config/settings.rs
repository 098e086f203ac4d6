//! Station settings

use crate::core::coordinator::RunTiming;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the service base URL
pub const URL_ENV: &str = "TESTSTATION_URL";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home directory to resolve the config location against
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Invalid config file {path}: {source}")]
    Parse {
        /// Config file
        path: PathBuf,
        /// Cause
        #[source]
        source: toml::de::Error,
    },

    /// Config could not be encoded
    #[error("Could not encode config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A setting is out of range
    #[error("Invalid setting {key}: {reason}")]
    Invalid {
        /// Setting
        key: &'static str,
        /// What is wrong
        reason: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Execution service
    pub service: ServiceConfig,
    /// Run timing
    pub polling: PollingConfig,
    /// Display settings
    pub display: DisplayConfig,
    /// Serial store
    pub storage: StorageConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from the default location. A missing file yields the
    /// defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load config from a file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a file, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Apply the `TESTSTATION_URL` override
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(URL_ENV) {
            self.apply_url(Some(url));
        }
    }

    /// Override the base URL; blank values are ignored
    pub fn apply_url(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.service.base_url = url;
        }
    }

    /// Reject settings the station cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "polling.interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.polling.tick_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "polling.tick_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.service.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "service.request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Run timing from the polling section
    pub fn run_timing(&self) -> RunTiming {
        RunTiming {
            poll_interval: Duration::from_secs(self.polling.interval_secs),
            tick: Duration::from_secs(self.polling.tick_secs),
        }
    }

    /// Serial store file, falling back to `serials.json` in the working
    /// directory when no data directory exists
    pub fn serial_file(&self) -> PathBuf {
        self.storage
            .serial_file
            .clone()
            .or_else(|| super::data_dir().map(|d| d.join("serials.json")))
            .unwrap_or_else(|| PathBuf::from("serials.json"))
    }
}

/// Execution service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL, e.g. `http://localhost:8080/api`
    pub base_url: String,
    /// Per-request timeout (seconds)
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl ServiceConfig {
    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between status queries (seconds)
    pub interval_secs: u64,
    /// Elapsed timer period (seconds)
    pub tick_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            tick_secs: 1,
        }
    }
}

/// Display settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Rows shown in the recent tests list
    pub recent_limit: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { recent_limit: 5 }
    }
}

/// Serial store settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Serial store file; defaults to `serials.json` in the data directory
    pub serial_file: Option<PathBuf>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `teststation_core=debug`
    pub level: String,
    /// Also write daily log files here
    pub directory: Option<PathBuf>,
    /// Log line format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.service.request_timeout_secs, 15);
        assert_eq!(config.polling.interval_secs, 3);
        assert_eq!(config.display.recent_limit, 5);
        assert_eq!(config.run_timing(), RunTiming::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.service.base_url = "http://station-7:9000/api".to_string();
        config.storage.serial_file = Some(dir.path().join("serials.json"));
        config.logging.format = LogFormat::Json;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.serial_file(), dir.path().join("serials.json"));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[polling]\ninterval_secs = 5\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.polling.interval_secs, 5);
        assert_eq!(config.polling.tick_secs, 1);
        assert_eq!(config.service, ServiceConfig::default());
    }

    #[test]
    fn test_invalid_files_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[polling\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Parse { .. })));

        std::fs::write(&path, "[polling]\ninterval_secs = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::Invalid {
                key: "polling.interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_url_override() {
        let mut config = AppConfig::default();
        config.apply_url(Some("  ".to_string()));
        assert_eq!(config.service.base_url, ServiceConfig::default().base_url);

        config.apply_url(Some("http://10.0.0.5/api".to_string()));
        assert_eq!(config.service.base_url, "http://10.0.0.5/api");
    }
}
