//! Swabian Pulse Streamer wire types.
//!
//! The instrument is driven over gRPC (`pulse_streamer.PulseStreamer`). This
//! module carries the message schema as prost types ([`proto`]), a builder
//! that turns per-channel patterns into a [`proto::SequenceMessage`]
//! ([`sequence`]) and a YAML description of sequences for the command line
//! ([`sequence_file`]). No connection to an instrument is made here.

pub mod proto;
pub mod sequence;
pub mod sequence_file;

use thiserror::Error;

pub use proto::{
    decode_frame, encode_frame, ClockMessage, GetSerialMessage, PulseMessage, PulseStreamerReply, PulseStreamerStringReply,
    Rpc, SequenceMessage, TriggerMessage, VoidMessage,
};
pub use sequence::{OutputState, RunCount, SequenceBuilder, SequenceSummary};
pub use sequence_file::SequenceFile;

/// Number of digital outputs.
pub const DIGITAL_CHANNELS: u8 = 8;
/// Number of analog outputs.
pub const ANALOG_CHANNELS: u8 = 2;
/// Duration of one tick in nanoseconds.
pub const TICK_NS: u64 = 1;
/// Analog full scale in volts.
pub const ANALOG_FULL_SCALE_V: f64 = 1.0;
/// Raw DAC value at full scale.
pub const ANALOG_FULL_SCALE_RAW: i32 = 32767;
/// Most pulses one uploaded sequence may hold (2·10⁶ on the Pulse Streamer 8/2).
pub const MAX_PULSES: u64 = 2_000_000;

/// Violations of the message schema or of instrument limits.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PulseError {
    /// Decoded enum field holds an undeclared value
    #[error("{message}.{field} = {value} is outside 0..={max}")]
    EnumOutOfRange {
        /// Message type name
        message: &'static str,
        /// Field name
        field: &'static str,
        /// Raw value found
        value: i32,
        /// Largest declared value
        max: i32,
    },

    /// No step has a non-zero length
    #[error("sequence has no pulse of non-zero length")]
    EmptySequence,

    /// Channel number beyond the instrument outputs
    #[error("{kind} channel {channel} does not exist (0..{count})")]
    InvalidChannel {
        /// `digital` or `analog`
        kind: &'static str,
        /// Requested channel
        channel: u8,
        /// Channels of that kind
        count: u8,
    },

    /// Voltage beyond analog full scale
    #[error("analog channel {channel}: {volts} V is outside ±1 V")]
    AnalogOutOfRange {
        /// Analog channel
        channel: u8,
        /// Requested voltage
        volts: f64,
    },

    /// Zero repetitions
    #[error("run count must be at least 1")]
    InvalidRunCount,

    /// Step lengths of one channel add up past `u64::MAX`
    #[error("{kind} channel {channel}: pattern is longer than {} ticks", u64::MAX)]
    DurationOverflow {
        /// `digital` or `analog`
        kind: &'static str,
        /// Channel whose pattern overflows
        channel: u8,
    },

    /// Sequence longer than the instrument memory
    #[error("sequence needs {pulses} pulses, the instrument holds at most {max}")]
    TooManyPulses {
        /// Pulses the sequence needs
        pulses: u64,
        /// Instrument limit
        max: u64,
    },

    /// Method name not in the service
    #[error("unknown PulseStreamer method '{0}'")]
    UnknownRpc(String),

    /// Malformed gRPC length-prefixed frame
    #[error("gRPC frame: {0}")]
    Frame(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err = PulseError::EnumOutOfRange {
            message: "TriggerMessage",
            field: "start",
            value: 7,
            max: 4,
        };
        assert_eq!(err.to_string(), "TriggerMessage.start = 7 is outside 0..=4");

        let err = PulseError::InvalidChannel {
            kind: "digital",
            channel: 8,
            count: DIGITAL_CHANNELS,
        };
        assert_eq!(err.to_string(), "digital channel 8 does not exist (0..8)");
    }
}
