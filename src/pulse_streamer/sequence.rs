//! Compile per-channel patterns into a [`SequenceMessage`].
//!
//! Each output channel is described on its own as a list of `(ticks, level)`
//! steps. The instrument instead streams one list of pulses, each setting all
//! outputs at once for a number of ticks. [`SequenceBuilder::build`] cuts the
//! timeline at every step boundary of every channel and emits one pulse per
//! interval, merging neighbours that end up identical.

use super::proto::{PulseMessage, SequenceMessage};
use super::{
    PulseError, ANALOG_CHANNELS, ANALOG_FULL_SCALE_RAW, ANALOG_FULL_SCALE_V, DIGITAL_CHANNELS,
    MAX_PULSES, TICK_NS,
};
use crate::validation::is_in_range;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Convert volts to the raw DAC value.
pub fn volts_to_raw(channel: u8, volts: f64) -> Result<i32, PulseError> {
    // NaN fails the range check too
    is_in_range(volts, -ANALOG_FULL_SCALE_V..=ANALOG_FULL_SCALE_V)
        .map_err(|_| PulseError::AnalogOutOfRange { channel, volts })?;
    Ok((volts / ANALOG_FULL_SCALE_V * f64::from(ANALOG_FULL_SCALE_RAW)).round() as i32)
}

/// Convert a raw DAC value to volts.
pub fn raw_to_volts(raw: i32) -> f64 {
    f64::from(raw) / f64::from(ANALOG_FULL_SCALE_RAW) * ANALOG_FULL_SCALE_V
}

fn check_channel(kind: &'static str, channel: u8, count: u8) -> Result<(), PulseError> {
    if channel < count {
        Ok(())
    } else {
        Err(PulseError::InvalidChannel {
            kind,
            channel,
            count,
        })
    }
}

/// Levels of all outputs at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputState {
    /// Bit n set drives digital channel n high
    pub digital: u8,
    /// Analog outputs in volts
    pub analog: [f64; 2],
}

impl OutputState {
    /// All outputs low, 0 V.
    pub const ZERO: OutputState = OutputState {
        digital: 0,
        analog: [0.0, 0.0],
    };

    /// State with the given digital channels high and 0 V on both analog outputs.
    pub fn high(channels: &[u8]) -> Result<Self, PulseError> {
        let mut digital = 0u8;
        for &channel in channels {
            check_channel("digital", channel, DIGITAL_CHANNELS)?;
            digital |= 1 << channel;
        }
        Ok(Self {
            digital,
            analog: [0.0, 0.0],
        })
    }

    /// Wire form with zero duration, as used for `constant` and `final`.
    pub fn to_pulse(&self) -> Result<PulseMessage, PulseError> {
        Ok(PulseMessage {
            ticks: 0,
            digi: u32::from(self.digital),
            ao0: volts_to_raw(0, self.analog[0])?,
            ao1: volts_to_raw(1, self.analog[1])?,
        })
    }
}

/// How often the sequence is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCount {
    /// Repeat until stopped
    Infinite,
    /// Play a fixed number of times
    Times(u64),
}

impl RunCount {
    /// Wire value of `n_runs`.
    pub fn to_wire(self) -> Result<i64, PulseError> {
        match self {
            RunCount::Infinite => Ok(-1),
            RunCount::Times(0) => Err(PulseError::InvalidRunCount),
            RunCount::Times(n) => Ok(i64::try_from(n).unwrap_or(i64::MAX)),
        }
    }

    /// Interpret a decoded `n_runs`.
    pub fn from_wire(n_runs: i64) -> Self {
        u64::try_from(n_runs).map_or(RunCount::Infinite, RunCount::Times)
    }
}

impl Serialize for RunCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RunCount::Infinite => serializer.serialize_str("infinite"),
            RunCount::Times(n) => serializer.serialize_u64(*n),
        }
    }
}

/// Collects channel patterns and compiles them into a sequence.
///
/// ```rust
/// use qudi_station::pulse_streamer::{OutputState, RunCount, SequenceBuilder};
///
/// let mut builder = SequenceBuilder::new();
/// builder.set_digital(0, &[(100, true), (100, false)]).unwrap();
/// builder.set_digital(1, &[(50, false), (100, true)]).unwrap();
///
/// let sequence = builder.build(RunCount::Times(3), OutputState::ZERO).unwrap();
/// let ticks: Vec<u32> = sequence.pulse.iter().map(|p| p.ticks).collect();
/// assert_eq!(ticks, vec![50, 50, 50, 50]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SequenceBuilder {
    digital: BTreeMap<u8, Vec<(u64, bool)>>,
    analog: BTreeMap<u8, Vec<(u64, i32)>>,
}

impl SequenceBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pattern of a digital channel, replacing any earlier one.
    pub fn set_digital(
        &mut self,
        channel: u8,
        pattern: &[(u64, bool)],
    ) -> Result<&mut Self, PulseError> {
        check_channel("digital", channel, DIGITAL_CHANNELS)?;
        self.digital.insert(channel, pattern.to_vec());
        Ok(self)
    }

    /// Set the pattern of an analog channel in volts, replacing any earlier one.
    pub fn set_analog(
        &mut self,
        channel: u8,
        pattern: &[(u64, f64)],
    ) -> Result<&mut Self, PulseError> {
        check_channel("analog", channel, ANALOG_CHANNELS)?;
        let raw = pattern
            .iter()
            .map(|&(ticks, volts)| Ok((ticks, volts_to_raw(channel, volts)?)))
            .collect::<Result<Vec<_>, PulseError>>()?;
        self.analog.insert(channel, raw);
        Ok(self)
    }

    /// Length of the longest channel pattern in ticks.
    pub fn duration(&self) -> Result<u64, PulseError> {
        let digital = self
            .digital
            .iter()
            .map(|(&ch, p)| total(p).ok_or(overflow("digital", ch)));
        let analog = self
            .analog
            .iter()
            .map(|(&ch, p)| total(p).ok_or(overflow("analog", ch)));
        digital
            .chain(analog)
            .try_fold(0, |longest, ticks| Ok(longest.max(ticks?)))
    }

    /// Compile into a sequence played `runs` times, then holding `final_state`.
    pub fn build(
        &self,
        runs: RunCount,
        final_state: OutputState,
    ) -> Result<SequenceMessage, PulseError> {
        let n_runs = runs.to_wire()?;
        let final_pulse = final_state.to_pulse()?;

        let digital = self
            .digital
            .iter()
            .map(|(&ch, pattern)| Ok((ch, cumulative(pattern).ok_or(overflow("digital", ch))?)))
            .collect::<Result<Vec<(u8, Vec<(u64, bool)>)>, PulseError>>()?;
        let analog = self
            .analog
            .iter()
            .map(|(&ch, pattern)| Ok((ch, cumulative(pattern).ok_or(overflow("analog", ch))?)))
            .collect::<Result<Vec<(u8, Vec<(u64, i32)>)>, PulseError>>()?;

        let mut boundaries = BTreeSet::from([0u64]);
        for (_, ends) in &digital {
            boundaries.extend(ends.iter().map(|&(end, _)| end));
        }
        for (_, ends) in &analog {
            boundaries.extend(ends.iter().map(|&(end, _)| end));
        }
        let boundaries: Vec<u64> = boundaries.into_iter().collect();
        if boundaries.len() < 2 {
            return Err(PulseError::EmptySequence);
        }

        // (ticks, digi, ao0, ao1), ticks not yet limited to u32
        let mut merged: Vec<(u64, u32, i32, i32)> = Vec::new();
        for window in boundaries.windows(2) {
            let (start, end) = (window[0], window[1]);
            let mut digi = 0u32;
            for (channel, ends) in &digital {
                if level_at(ends, start).unwrap_or(false) {
                    digi |= 1 << channel;
                }
            }
            let mut ao = [0i32; 2];
            for (channel, ends) in &analog {
                ao[usize::from(*channel)] = level_at(ends, start).unwrap_or(0);
            }

            let ticks = end - start;
            match merged.last_mut() {
                Some(last) if (last.1, last.2, last.3) == (digi, ao[0], ao[1]) => last.0 += ticks,
                _ => merged.push((ticks, digi, ao[0], ao[1])),
            }
        }

        let chunk_ticks = u64::from(u32::MAX);
        let pulses = merged
            .iter()
            .map(|(ticks, ..)| ticks.div_ceil(chunk_ticks))
            .fold(0u64, u64::saturating_add);
        if pulses > MAX_PULSES {
            return Err(PulseError::TooManyPulses {
                pulses,
                max: MAX_PULSES,
            });
        }

        let total_ticks = boundaries.last().copied().unwrap_or(0);
        let mut pulse = Vec::with_capacity(merged.len());
        for (mut ticks, digi, ao0, ao1) in merged {
            while ticks > 0 {
                let chunk = ticks.min(chunk_ticks);
                ticks -= chunk;
                pulse.push(PulseMessage {
                    ticks: u32::try_from(chunk).unwrap_or(u32::MAX),
                    digi,
                    ao0,
                    ao1,
                });
            }
        }

        debug!(
            pulses = pulse.len(),
            ticks = total_ticks,
            n_runs,
            "compiled pulse sequence"
        );
        Ok(SequenceMessage {
            pulse,
            n_runs,
            final_pulse: Some(final_pulse),
        })
    }
}

fn overflow(kind: &'static str, channel: u8) -> PulseError {
    PulseError::DurationOverflow { kind, channel }
}

/// Sum of step lengths, `None` past `u64::MAX`.
fn total<T>(pattern: &[(u64, T)]) -> Option<u64> {
    pattern
        .iter()
        .try_fold(0u64, |sum, (ticks, _)| sum.checked_add(*ticks))
}

/// Steps as `(end tick, level)`, zero-length steps removed. `None` past `u64::MAX`.
fn cumulative<T: Copy>(pattern: &[(u64, T)]) -> Option<Vec<(u64, T)>> {
    let mut end = 0u64;
    pattern
        .iter()
        .filter(|(ticks, _)| *ticks > 0)
        .map(|&(ticks, level)| {
            end = end.checked_add(ticks)?;
            Some((end, level))
        })
        .collect()
}

/// Level of the step covering tick `t`; `None` once the pattern has ended.
fn level_at<T: Copy>(ends: &[(u64, T)], t: u64) -> Option<T> {
    let idx = ends.partition_point(|&(end, _)| end <= t);
    ends.get(idx).map(|&(_, level)| level)
}

/// Overview of a sequence as sent to the instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceSummary {
    /// Number of pulse messages
    pub pulses: usize,
    /// Length of one run in ticks
    pub total_ticks: u64,
    /// Length of one run in nanoseconds
    pub duration_ns: u64,
    /// Repetitions
    pub runs: RunCount,
    /// Ticks each digital channel is high during one run
    pub digital_high_ticks: Vec<u64>,
    /// Lowest and highest voltage per analog channel
    pub analog_span_volts: Vec<[f64; 2]>,
    /// Digital channels high after the last run
    pub final_digital_high: Vec<u8>,
}

/// Summarise a sequence message, e.g. one decoded from a file.
pub fn describe(sequence: &SequenceMessage) -> SequenceSummary {
    let mut digital_high_ticks = vec![0u64; usize::from(DIGITAL_CHANNELS)];
    let mut spans: Vec<Option<[i32; 2]>> = vec![None; usize::from(ANALOG_CHANNELS)];
    let mut total_ticks = 0u64;

    for pulse in &sequence.pulse {
        let ticks = u64::from(pulse.ticks);
        total_ticks += ticks;
        for (channel, high) in digital_high_ticks.iter_mut().enumerate() {
            if pulse.digi & (1 << channel) != 0 {
                *high += ticks;
            }
        }
        for (span, raw) in spans.iter_mut().zip([pulse.ao0, pulse.ao1]) {
            *span = Some(match *span {
                Some([lo, hi]) => [lo.min(raw), hi.max(raw)],
                None => [raw, raw],
            });
        }
    }

    let final_digital_high = sequence
        .final_pulse
        .map(|p| {
            (0..DIGITAL_CHANNELS)
                .filter(|&channel| p.digi & (1 << channel) != 0)
                .collect()
        })
        .unwrap_or_default();

    SequenceSummary {
        pulses: sequence.pulse.len(),
        total_ticks,
        duration_ns: total_ticks * TICK_NS,
        runs: RunCount::from_wire(sequence.n_runs),
        digital_high_ticks,
        analog_span_volts: spans
            .into_iter()
            .map(|span| {
                let [lo, hi] = span.unwrap_or([0, 0]);
                [raw_to_volts(lo), raw_to_volts(hi)]
            })
            .collect(),
        final_digital_high,
    }
}
