//! Wire-level checks of the Pulse Streamer message types.

use anyhow::Result;
use prost::Message;
use qudi_station::pulse_streamer::proto::{
    clock_message::Clocking, get_serial_message::Serial, trigger_message::Mode,
    trigger_message::Start,
};
use qudi_station::pulse_streamer::sequence::describe;
use qudi_station::pulse_streamer::{
    ClockMessage, GetSerialMessage, PulseError, PulseMessage, PulseStreamerReply,
    PulseStreamerStringReply, Rpc, RunCount, SequenceFile, SequenceMessage, TriggerMessage,
    VoidMessage,
};
use std::path::PathBuf;

#[test]
fn sequence_message_known_bytes() {
    let message = SequenceMessage {
        pulse: vec![PulseMessage {
            ticks: 100,
            digi: 1,
            ao0: 0,
            ao1: 0,
        }],
        n_runs: 3,
        final_pulse: Some(PulseMessage::default()),
    };
    assert_eq!(
        message.encode_to_vec(),
        vec![
            0x0a, 0x04, 0x08, 0x64, 0x10, 0x01, // pulse: ticks=100, digi=1
            0x10, 0x03, // n_runs=3
            0x1a, 0x00, // final: empty message
        ]
    );
}

#[test]
fn infinite_runs_encode_as_minus_one() {
    let message = SequenceMessage {
        pulse: vec![],
        n_runs: -1,
        final_pulse: None,
    };
    let bytes = message.encode_to_vec();
    assert_eq!(bytes.len(), 11);
    assert_eq!(bytes[0], 0x10);
    assert_eq!(&bytes[1..10], &[0xff; 9]);
    assert_eq!(bytes[10], 0x01);
}

#[test]
fn small_messages_known_bytes() {
    assert!(VoidMessage {}.encode_to_vec().is_empty());
    assert_eq!(
        ClockMessage {
            clock_source: Clocking::Ext10mhz.into()
        }
        .encode_to_vec(),
        vec![0x08, 0x02]
    );
    assert_eq!(
        GetSerialMessage {
            serial: Serial::Mac.into()
        }
        .encode_to_vec(),
        vec![0x08, 0x01]
    );
    assert_eq!(
        PulseStreamerReply { value: 1 }.encode_to_vec(),
        vec![0x08, 0x01]
    );
    assert_eq!(
        PulseStreamerStringReply {
            string_value: "1.6".to_string()
        }
        .encode_to_vec(),
        vec![0x0a, 0x03, b'1', b'.', b'6']
    );
    // Default values are not written
    assert!(GetSerialMessage {
        serial: Serial::Serial.into()
    }
    .encode_to_vec()
    .is_empty());
}

#[test]
fn messages_round_trip() -> Result<()> {
    let sequence = SequenceMessage {
        pulse: vec![
            PulseMessage {
                ticks: 10,
                digi: 0xff,
                ao0: -32767,
                ao1: 32767,
            },
            PulseMessage {
                ticks: u32::MAX,
                digi: 0,
                ao0: 1,
                ao1: -1,
            },
        ],
        n_runs: -1,
        final_pulse: Some(PulseMessage {
            ticks: 0,
            digi: 0b101,
            ao0: 0,
            ao1: 0,
        }),
    };
    assert_eq!(SequenceMessage::decode(sequence.encode_to_vec().as_slice())?, sequence);

    let trigger = TriggerMessage::with(Start::HardwareRisingAndFalling, Mode::Single);
    let decoded = TriggerMessage::decode(trigger.encode_to_vec().as_slice())?;
    assert_eq!(decoded, trigger);
    assert_eq!(decoded.start(), Start::HardwareRisingAndFalling);
    assert_eq!(decoded.mode(), Mode::Single);

    let reply = PulseStreamerStringReply {
        string_value: "PS8-1234".to_string(),
    };
    assert_eq!(
        PulseStreamerStringReply::decode(reply.encode_to_vec().as_slice())?,
        reply
    );
    Ok(())
}

#[test]
fn enum_ranges_hold() {
    let ranges = [
        ("Start", (0..=4).all(Start::is_valid), Start::is_valid(5)),
        ("Mode", (0..=1).all(Mode::is_valid), Mode::is_valid(2)),
        ("Clocking", (0..=2).all(Clocking::is_valid), Clocking::is_valid(3)),
        ("Serial", (0..=1).all(Serial::is_valid), Serial::is_valid(2)),
    ];
    for (name, inside, past_end) in ranges {
        assert!(inside, "{name} rejects a declared value");
        assert!(!past_end, "{name} accepts an undeclared value");
    }
    assert!(!Start::is_valid(-1));
}

#[test]
fn out_of_range_values_survive_decoding_and_are_reported() -> Result<()> {
    // start = 5, mode = 1
    let bytes = [0x08, 0x05, 0x10, 0x01];
    let trigger = TriggerMessage::decode(bytes.as_slice())?;
    assert_eq!(trigger.start, 5);
    assert_eq!(
        trigger.validate(),
        Err(PulseError::EnumOutOfRange {
            message: "TriggerMessage",
            field: "start",
            value: 5,
            max: 4,
        })
    );

    let clock = ClockMessage::decode([0x08, 0x03].as_slice())?;
    assert!(clock.validate().is_err());
    let serial = GetSerialMessage::decode([0x08, 0x01].as_slice())?;
    assert!(serial.validate().is_ok());
    Ok(())
}

#[test]
fn rpc_paths() {
    let paths: Vec<String> = Rpc::ALL.iter().map(Rpc::path).collect();
    assert_eq!(paths[0], "/pulse_streamer.PulseStreamer/reset");
    assert_eq!(paths[12], "/pulse_streamer.PulseStreamer/getSerial");
    let string_replies: Vec<_> = Rpc::ALL
        .iter()
        .filter(|rpc| rpc.reply_type() == "PulseStreamerStringReply")
        .map(|rpc| rpc.name())
        .collect();
    assert_eq!(string_replies, vec!["getFirmwareVersion", "getSerial"]);
}

#[tokio::test]
async fn shipped_sequence_compiles() -> Result<()> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/sequences/odmr_gate.yaml");
    let file = SequenceFile::load(&path).await?;
    let message = file.compile()?;
    let decoded = SequenceMessage::decode(message.encode_to_vec().as_slice())?;
    let summary = describe(&decoded);

    assert_eq!(summary.total_ticks, 4000);
    assert_eq!(summary.runs, RunCount::Infinite);
    assert_eq!(summary.digital_high_ticks[0], 3000);
    assert_eq!(summary.digital_high_ticks[1], 500);
    assert_eq!(summary.digital_high_ticks[2], 800);
    assert_eq!(summary.final_digital_high, vec![0]);
    // boundaries at 2000, 2500, 3000, 3800
    assert_eq!(summary.pulses, 5);
    Ok(())
}
