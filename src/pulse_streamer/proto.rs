//! Message types of the `pulse_streamer` protobuf package.
//!
//! Written out with prost derives rather than generated at build time; field
//! numbers and scalar types follow `proto/pulse_streamer.proto` exactly.
//! Enum fields are stored as raw `i32` like prost-generated code, so a decoded
//! message may carry values outside the declared range. `validate()` reports
//! those.

use super::PulseError;
use crate::error::AppResult;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use std::fmt;
use std::str::FromStr;

/// Length of the gRPC message prefix: compression flag and big-endian length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Empty request or reply.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct VoidMessage {}

/// One output state held for `ticks` nanoseconds.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct PulseMessage {
    /// Duration in ticks (1 ns)
    #[prost(uint32, tag = "1")]
    pub ticks: u32,
    /// Digital outputs, bit n drives channel n
    #[prost(uint32, tag = "2")]
    pub digi: u32,
    /// Analog output 0, raw DAC value
    #[prost(int32, tag = "3")]
    pub ao0: i32,
    /// Analog output 1, raw DAC value
    #[prost(int32, tag = "4")]
    pub ao1: i32,
}

/// A pulse sequence to stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SequenceMessage {
    /// Pulses in output order
    #[prost(message, repeated, tag = "1")]
    pub pulse: Vec<PulseMessage>,
    /// Number of repetitions, negative for infinite
    #[prost(int64, tag = "2")]
    pub n_runs: i64,
    /// State held after the last run (`final` on the wire)
    #[prost(message, optional, tag = "3")]
    pub final_pulse: Option<PulseMessage>,
}

/// Trigger configuration.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct TriggerMessage {
    /// Raw [`trigger_message::Start`] value
    #[prost(enumeration = "trigger_message::Start", tag = "1")]
    pub start: i32,
    /// Raw [`trigger_message::Mode`] value
    #[prost(enumeration = "trigger_message::Mode", tag = "2")]
    pub mode: i32,
}

/// Nested types of [`TriggerMessage`].
pub mod trigger_message {
    /// What starts the stream.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Start {
        /// As soon as the sequence is uploaded
        Immediate = 0,
        /// On `startNow`
        Software = 1,
        /// Rising edge on the trigger input
        HardwareRising = 2,
        /// Falling edge on the trigger input
        HardwareFalling = 3,
        /// Either edge on the trigger input
        HardwareRisingAndFalling = 4,
    }

    impl Start {
        /// Value name as written in the schema.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Start::Immediate => "IMMEDIATE",
                Start::Software => "SOFTWARE",
                Start::HardwareRising => "HARDWARE_RISING",
                Start::HardwareFalling => "HARDWARE_FALLING",
                Start::HardwareRisingAndFalling => "HARDWARE_RISING_AND_FALLING",
            }
        }

        /// Parse a schema value name.
        pub fn from_str_name(value: &str) -> Option<Self> {
            match value {
                "IMMEDIATE" => Some(Start::Immediate),
                "SOFTWARE" => Some(Start::Software),
                "HARDWARE_RISING" => Some(Start::HardwareRising),
                "HARDWARE_FALLING" => Some(Start::HardwareFalling),
                "HARDWARE_RISING_AND_FALLING" => Some(Start::HardwareRisingAndFalling),
                _ => None,
            }
        }
    }

    /// Whether the trigger re-arms after a run.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Mode {
        /// Every trigger restarts the sequence
        Normal = 0,
        /// Only the first trigger counts until `rearm`
        Single = 1,
    }

    impl Mode {
        /// Value name as written in the schema.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Mode::Normal => "NORMAL",
                Mode::Single => "SINGLE",
            }
        }

        /// Parse a schema value name.
        pub fn from_str_name(value: &str) -> Option<Self> {
            match value {
                "NORMAL" => Some(Mode::Normal),
                "SINGLE" => Some(Mode::Single),
                _ => None,
            }
        }
    }
}

/// Clock source selection.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct ClockMessage {
    /// Raw [`clock_message::Clocking`] value
    #[prost(enumeration = "clock_message::Clocking", tag = "1")]
    pub clock_source: i32,
}

/// Nested types of [`ClockMessage`].
pub mod clock_message {
    /// Reference the instrument clock follows.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Clocking {
        /// On-board oscillator
        Internal = 0,
        /// External 125 MHz sampling clock
        Ext125mhz = 1,
        /// External 10 MHz reference
        Ext10mhz = 2,
    }

    impl Clocking {
        /// Value name as written in the schema.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Clocking::Internal => "INTERNAL",
                Clocking::Ext125mhz => "EXT_125MHZ",
                Clocking::Ext10mhz => "EXT_10MHZ",
            }
        }

        /// Parse a schema value name.
        pub fn from_str_name(value: &str) -> Option<Self> {
            match value {
                "INTERNAL" => Some(Clocking::Internal),
                "EXT_125MHZ" => Some(Clocking::Ext125mhz),
                "EXT_10MHZ" => Some(Clocking::Ext10mhz),
                _ => None,
            }
        }
    }
}

/// Which identifier `getSerial` returns.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct GetSerialMessage {
    /// Raw [`get_serial_message::Serial`] value
    #[prost(enumeration = "get_serial_message::Serial", tag = "1")]
    pub serial: i32,
}

/// Nested types of [`GetSerialMessage`].
pub mod get_serial_message {
    /// Identifier to report.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Serial {
        /// Device serial number
        Serial = 0,
        /// Ethernet MAC address
        Mac = 1,
    }

    impl Serial {
        /// Value name as written in the schema.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Serial::Serial => "SERIAL",
                Serial::Mac => "MAC",
            }
        }

        /// Parse a schema value name.
        pub fn from_str_name(value: &str) -> Option<Self> {
            match value {
                "SERIAL" => Some(Serial::Serial),
                "MAC" => Some(Serial::Mac),
                _ => None,
            }
        }
    }
}

/// Numeric reply; status queries answer 0 or 1.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct PulseStreamerReply {
    /// Result value
    #[prost(uint32, tag = "1")]
    pub value: u32,
}

/// Text reply of `getFirmwareVersion` and `getSerial`.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct PulseStreamerStringReply {
    /// Result text
    #[prost(string, tag = "1")]
    pub string_value: String,
}

fn check_enum(
    message: &'static str,
    field: &'static str,
    value: i32,
    max: i32,
) -> Result<(), PulseError> {
    if (0..=max).contains(&value) {
        Ok(())
    } else {
        Err(PulseError::EnumOutOfRange {
            message,
            field,
            value,
            max,
        })
    }
}

impl TriggerMessage {
    /// Trigger message from typed values.
    pub fn with(start: trigger_message::Start, mode: trigger_message::Mode) -> Self {
        Self {
            start: start.into(),
            mode: mode.into(),
        }
    }

    /// Check both enum fields against their declared range.
    pub fn validate(&self) -> Result<(), PulseError> {
        check_enum(
            "TriggerMessage",
            "start",
            self.start,
            trigger_message::Start::HardwareRisingAndFalling as i32,
        )?;
        check_enum(
            "TriggerMessage",
            "mode",
            self.mode,
            trigger_message::Mode::Single as i32,
        )
    }
}

impl ClockMessage {
    /// Check the clock source against its declared range.
    pub fn validate(&self) -> Result<(), PulseError> {
        check_enum(
            "ClockMessage",
            "clock_source",
            self.clock_source,
            clock_message::Clocking::Ext10mhz as i32,
        )
    }
}

impl GetSerialMessage {
    /// Check the serial selector against its declared range.
    pub fn validate(&self) -> Result<(), PulseError> {
        check_enum(
            "GetSerialMessage",
            "serial",
            self.serial,
            get_serial_message::Serial::Mac as i32,
        )
    }
}

/// Methods of the `PulseStreamer` service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rpc {
    /// `reset`: stop and return to the power-on state
    Reset,
    /// `constant`: hold one output state
    Constant,
    /// `forceFinal`: jump to the final state
    ForceFinal,
    /// `stream`: upload a sequence
    Stream,
    /// `startNow`: software trigger
    StartNow,
    /// `setTrigger`: trigger source and mode
    SetTrigger,
    /// `rearm`: accept the next trigger in single mode
    Rearm,
    /// `selectClock`: clock source
    SelectClock,
    /// `isStreaming`: 1 while a sequence plays
    IsStreaming,
    /// `hasSequence`: 1 once a sequence is uploaded
    HasSequence,
    /// `hasFinished`: 1 after the last run
    HasFinished,
    /// `getFirmwareVersion`
    GetFirmwareVersion,
    /// `getSerial`: serial number or MAC address
    GetSerial,
}

impl Rpc {
    /// Every method in schema order.
    pub const ALL: [Rpc; 13] = [
        Rpc::Reset,
        Rpc::Constant,
        Rpc::ForceFinal,
        Rpc::Stream,
        Rpc::StartNow,
        Rpc::SetTrigger,
        Rpc::Rearm,
        Rpc::SelectClock,
        Rpc::IsStreaming,
        Rpc::HasSequence,
        Rpc::HasFinished,
        Rpc::GetFirmwareVersion,
        Rpc::GetSerial,
    ];

    /// Fully qualified service name.
    pub const SERVICE: &'static str = "pulse_streamer.PulseStreamer";

    /// Method name as written in the schema.
    pub fn name(&self) -> &'static str {
        match self {
            Rpc::Reset => "reset",
            Rpc::Constant => "constant",
            Rpc::ForceFinal => "forceFinal",
            Rpc::Stream => "stream",
            Rpc::StartNow => "startNow",
            Rpc::SetTrigger => "setTrigger",
            Rpc::Rearm => "rearm",
            Rpc::SelectClock => "selectClock",
            Rpc::IsStreaming => "isStreaming",
            Rpc::HasSequence => "hasSequence",
            Rpc::HasFinished => "hasFinished",
            Rpc::GetFirmwareVersion => "getFirmwareVersion",
            Rpc::GetSerial => "getSerial",
        }
    }

    /// gRPC request path, e.g. `/pulse_streamer.PulseStreamer/stream`.
    pub fn path(&self) -> String {
        format!("/{}/{}", Self::SERVICE, self.name())
    }

    /// Request message name.
    pub fn request_type(&self) -> &'static str {
        match self {
            Rpc::Constant => "PulseMessage",
            Rpc::Stream => "SequenceMessage",
            Rpc::SetTrigger => "TriggerMessage",
            Rpc::SelectClock => "ClockMessage",
            Rpc::GetSerial => "GetSerialMessage",
            _ => "VoidMessage",
        }
    }

    /// Reply message name.
    pub fn reply_type(&self) -> &'static str {
        match self {
            Rpc::GetFirmwareVersion | Rpc::GetSerial => "PulseStreamerStringReply",
            _ => "PulseStreamerReply",
        }
    }

    /// Look a method up by its schema name.
    pub fn from_name(name: &str) -> Result<Self, PulseError> {
        Self::ALL
            .into_iter()
            .find(|rpc| rpc.name() == name)
            .ok_or_else(|| PulseError::UnknownRpc(name.to_string()))
    }
}

impl FromStr for Rpc {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wrap a message in the length-prefixed frame gRPC sends over HTTP/2.
pub fn encode_frame<M: Message>(message: &M) -> AppResult<Bytes> {
    let len = message.encoded_len();
    let prefix = u32::try_from(len)
        .map_err(|_| PulseError::Frame(format!("message of {} bytes is too large", len)))?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + len);
    buf.put_u8(0);
    buf.put_u32(prefix);
    message.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Decode one uncompressed gRPC frame holding exactly one message.
pub fn decode_frame<M: Message + Default>(frame: &[u8]) -> AppResult<M> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(PulseError::Frame(format!(
            "{} bytes is shorter than the {}-byte header",
            frame.len(),
            FRAME_HEADER_LEN
        ))
        .into());
    }
    let mut header = &frame[..FRAME_HEADER_LEN];
    let compressed = header.get_u8();
    let len = header.get_u32() as usize;
    if compressed != 0 {
        return Err(PulseError::Frame("compressed frames are not supported".to_string()).into());
    }
    let body = &frame[FRAME_HEADER_LEN..];
    if body.len() != len {
        return Err(PulseError::Frame(format!(
            "header announces {} bytes but {} follow",
            len,
            body.len()
        ))
        .into());
    }
    Ok(M::decode(body)?)
}
