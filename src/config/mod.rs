//! Configuration module
//!
//! Handles station settings and the application directories

mod settings;

pub use settings::{
    AppConfig, ConfigError, DisplayConfig, LogFormat, LoggingConfig, PollingConfig, ServiceConfig,
    StorageConfig, URL_ENV,
};

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "teststation", "Teststation")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Default config file location
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
