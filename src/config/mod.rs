//! Configuration module
//!
//! Handles application settings stored as TOML in the platform config directory

mod settings;

pub use settings::{AppConfig, CaptureConfig, ConfigError, LoggingConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Config file name inside [`config_dir`]
pub const CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "loggerlink", "Loggerlink")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default config file location
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE))
}
