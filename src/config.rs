//! # Configuration Management Module
//!
//! Persistent application settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `user_id`: Owner of daily aggregates and vital uploads
//! - `database_path`: SQLite file for the local store (defaults to the data dir)
//! - `measurement_duration_secs`: Length of one ECG measurement
//! - `cell_size`: Waveform display cell size used for scaling and clipping
//! - `utc_offset_minutes`: Offset used to bucket sleep and steps into calendar days
//! - `log_filter`: Default env_logger filter
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/ring-vitals/config.toml
//! - Linux: ~/.config/ring-vitals/config.toml
//! - Windows: %APPDATA%\ring-vitals\config.toml

use crate::arbiter::DEFAULT_CELL_SIZE;
use crate::error::ConfigError;
use crate::session::DEFAULT_DURATION_SECS;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "ring-vitals";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user_id: String,
    pub database_path: Option<PathBuf>,
    pub measurement_duration_secs: u32,
    pub cell_size: f64,
    pub utc_offset_minutes: i32,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            database_path: None,
            measurement_duration_secs: DEFAULT_DURATION_SECS,
            cell_size: DEFAULT_CELL_SIZE,
            utc_offset_minutes: 0,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join(APP_DIR).join("config.toml")
    }

    /// Load config from the platform location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Save config to the platform location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::config_path())
    }

    /// Load config from an explicit path, writing defaults there when missing
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to an explicit path
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    /// Resolved SQLite path, falling back to the platform data directory
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("vitals.db"),
        }
    }

    /// Offset used for calendar-day bucketing; out-of-range values fall back to UTC
    pub fn day_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.user_id, "local");
        assert_eq!(config.measurement_duration_secs, 60);
        assert_eq!(config.utc_offset_minutes, 0);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config {
            user_id: "u-42".to_string(),
            measurement_duration_secs: 30,
            ..Config::default()
        };

        let toml_str = toml::to_string(&config).expect("Failed to serialize");
        assert!(toml_str.contains("user_id = \"u-42\""));
        assert!(toml_str.contains("measurement_duration_secs = 30"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml_str = r#"
            user_id = "abc"
            utc_offset_minutes = 120
        "#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.user_id, "abc");
        assert_eq!(config.measurement_duration_secs, 60);
        assert_eq!(config.day_offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_config_load_creates_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).expect("Failed to load config");
        assert_eq!(config.user_id, "local");
        assert!(path.exists());
    }

    #[test]
    fn test_config_roundtrip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config {
            database_path: Some(dir.path().join("v.db")),
            cell_size: 12.5,
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.database_path(), dir.path().join("v.db"));
        assert_eq!(loaded.cell_size, 12.5);
    }

    #[test]
    fn test_invalid_offset_falls_back_to_utc() {
        let config = Config {
            utc_offset_minutes: 100_000,
            ..Config::default()
        };
        assert_eq!(config.day_offset().local_minus_utc(), 0);
    }
}
