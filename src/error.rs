//! Custom error types for the crate.
//!
//! `StationError` is the single error type returned by the library. It is built
//! with `thiserror` so that the underlying parser, codec and I/O errors convert
//! through `?` without boilerplate.
//!
//! ## Error Hierarchy
//!
//! - **`Io`**: file access while reading station files, catalogs or sequences.
//! - **`Yaml`**: YAML syntax errors reported by `serde_yaml`.
//! - **`Scan`**: structural problems found by the line scanner before the YAML
//!   parser runs (tab indentation, for instance). Carries the 1-based line.
//! - **`Configuration`**: the document parsed but does not have the shape of a
//!   station file (root is not a mapping, a layer is a list, ...).
//! - **`Settings`**: the tool's own settings could not be extracted by figment.
//! - **`Decode`/`Encode`**: protobuf codec failures for Pulse Streamer messages.
//! - **`Pulse`**: a sequence or message violates an instrument constraint.
//!
//! Validation findings in a station file are not errors: they are reported as
//! [`Diagnostic`](crate::validation::Diagnostic)s so that one run can list all
//! of them.

use crate::pulse_streamer::PulseError;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, StationError>;

/// Errors produced while loading, checking or encoding station data.
#[derive(Error, Debug)]
pub enum StationError {
    /// File access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML syntax
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON output
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Station text the line scanner cannot follow
    #[error("line {line}: {message}")]
    Scan {
        /// 1-based line
        line: usize,
        /// What is wrong
        message: String,
    },

    /// Document does not have the shape of a station file
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Tool settings could not be extracted
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Protobuf decoding
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Protobuf encoding
    #[error("Protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Instrument constraint violated
    #[error("Pulse Streamer error: {0}")]
    Pulse(#[from] PulseError),
}

impl From<figment::Error> for StationError {
    fn from(value: figment::Error) -> Self {
        StationError::Settings(Box::new(value))
    }
}

impl StationError {
    /// Line number attached to the error, if the error points into a file.
    pub fn line(&self) -> Option<usize> {
        match self {
            StationError::Scan { line, .. } => Some(*line),
            StationError::Yaml(err) => err.location().map(|loc| loc.line()),
            _ => None,
        }
    }
}
