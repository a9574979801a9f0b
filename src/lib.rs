//! # qudi station tooling
//!
//! A qudi experiment-control station is described by a configuration file
//! that declares module instances in `hardware`, `logic` and `gui` layers and
//! wires them together with `connect` edges. The host framework resolves that
//! graph at startup and fails late, and sometimes silently, on mistakes in it.
//! This crate checks such files up front and carries the protobuf schema of
//! the Swabian Pulse Streamer, the pulse generator used by these stations.
//!
//! ## Crate Structure
//!
//! - **`station`**: parsed, line-annotated station files, the `connect`
//!   dependency graph, the class catalog and the validator.
//! - **`validation`**: diagnostics, reports and primitive value checks.
//! - **`pulse_streamer`**: prost message types for the `pulse_streamer` gRPC
//!   package and a builder compiling channel patterns into sequences.
//! - **`settings`**: the tool's own settings, layered with figment.
//! - **`tracing_setup`**: tracing subscriber initialisation.
//! - **`error`**: the `StationError` type shared by the library.

pub mod error;
pub mod pulse_streamer;
pub mod settings;
pub mod station;
pub mod tracing_setup;
pub mod validation;

pub use error::{AppResult, StationError};
pub use settings::Settings;
pub use station::{StationConfig, Validator};
pub use validation::{Diagnostic, DiagnosticCode, Severity, ValidationReport};
