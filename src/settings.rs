//! Tool settings using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. A TOML file (`qudi-station.toml` unless another path is given)
//! 3. Environment variables prefixed with `QUDI_STATION_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use qudi_station::settings::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Log level: {}", settings.application.log_level);
//! # Ok::<(), qudi_station::error::StationError>(())
//! ```

use crate::error::{AppResult, StationError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default settings file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "qudi-station.toml";

/// Environment prefix for overrides, e.g. `QUDI_STATION_APPLICATION__LOG_LEVEL=debug`.
pub const ENV_PREFIX: &str = "QUDI_STATION_";

/// Top-level tool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Station validation settings
    #[serde(default)]
    pub validation: ValidationSettings,
}

/// Application-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Defaults applied by `validate` when the command line does not override them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationSettings {
    /// Treat warnings as failures
    #[serde(default)]
    pub strict: bool,
    /// Directories scanned for module catalog files, highest priority first
    #[serde(default)]
    pub catalog_paths: Vec<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings::default(),
            validation: ValidationSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `qudi-station.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_SETTINGS_FILE)
    }

    /// Load settings from a specific file path. A missing file leaves the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(StationError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(StationError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        for path in &self.validation.catalog_paths {
            crate::validation::is_valid_path(&path.to_string_lossy())
                .map_err(|msg| StationError::Configuration(format!("catalog_paths: {msg}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.application.log_level, "info");
        assert_eq!(settings.application.log_format, "compact");
        assert!(!settings.validation.strict);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level 'verbose'"));
    }

    #[test]
    fn test_invalid_log_format() {
        let mut settings = Settings::default();
        settings.application.log_format = "xml".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_catalog_path_rejected() {
        let mut settings = Settings::default();
        settings.validation.catalog_paths.push(PathBuf::new());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("catalog_paths"));
    }
}
