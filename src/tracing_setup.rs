//! Tracing setup
//!
//! One `tracing-subscriber` fmt layer on stderr, so that command output on
//! stdout (load orders, DOT graphs, encoded sequences) stays
//! machine-readable. `RUST_LOG` takes precedence over the configured level.
//!
//! # Example
//! ```no_run
//! use qudi_station::{settings::Settings, tracing_setup};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! tracing_setup::init_from_settings(&settings)?;
//! info!("station check started");
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, StationError};
use crate::settings::Settings;
use std::fmt;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line with colors
    Pretty,
    /// One line per event
    Compact,
    /// Newline-delimited JSON objects
    Json,
}

impl OutputFormat {
    /// Name as written in settings files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Pretty, Self::Compact, Self::Json]
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown log format '{}' (pretty, compact, json)", s))
    }
}

/// Subscriber options resolved from [`Settings`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Most verbose level shown when `RUST_LOG` is unset
    pub level: Level,
    /// Line layout
    pub format: OutputFormat,
    /// Source location on every event
    pub with_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_location: false,
        }
    }
}

impl LogConfig {
    /// Read level and format from the `application` settings.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        let level = settings
            .application
            .log_level
            .parse::<Level>()
            .map_err(|_| {
                StationError::Configuration(format!(
                    "Invalid log_level '{}'",
                    settings.application.log_level
                ))
            })?;
        let format = settings
            .application
            .log_format
            .parse()
            .map_err(StationError::Configuration)?;
        Ok(Self {
            level,
            format,
            with_location: level >= Level::DEBUG,
        })
    }
}

/// Install the global subscriber configured by `settings`.
pub fn init_from_settings(settings: &Settings) -> AppResult<()> {
    init(&LogConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// Returns `Ok(())` without changes when one is already installed, so tests
/// may call it repeatedly.
pub fn init(config: &LogConfig) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));
    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.with_location)
        .with_line_number(config.with_location);
    let layer = match config.format {
        OutputFormat::Pretty => base.pretty().boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .or_else(|e| match e.to_string() {
            msg if msg.contains("already been set") => Ok(()),
            msg => Err(StationError::Configuration(format!("tracing: {}", msg))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("Pretty".parse::<OutputFormat>(), Ok(OutputFormat::Pretty));
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Compact.to_string(), "compact");
    }

    #[test]
    fn test_log_config_from_settings() {
        let mut settings = Settings::default();
        settings.application.log_level = "DEBUG".to_string();
        settings.application.log_format = "json".to_string();

        let config = LogConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_location);

        settings.application.log_level = "loud".to_string();
        assert!(LogConfig::from_settings(&settings).is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig {
            level: Level::WARN,
            ..Default::default()
        };
        assert!(init(&config).is_ok());
        assert!(init(&config).is_ok());
    }
}
