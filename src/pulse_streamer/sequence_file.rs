//! YAML description of a pulse sequence.
//!
//! ```yaml
//! runs: infinite        # or a positive integer, default 1
//! digital:
//!   0: [[100, true], [50, false]]
//! analog:
//!   1: [[150, 0.5]]
//! final:
//!   digital: [3]
//!   analog: [0.0, 0.0]
//! ```

use super::proto::SequenceMessage;
use super::sequence::{OutputState, RunCount, SequenceBuilder};
use crate::error::AppResult;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Outputs held once the last run is over.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinalState {
    /// Digital channels held high
    #[serde(default)]
    pub digital: Vec<u8>,
    /// Analog outputs in volts
    #[serde(default)]
    pub analog: [f64; 2],
}

/// A sequence as written by hand.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceFile {
    /// Repetitions
    #[serde(default = "one_run", deserialize_with = "deserialize_runs")]
    pub runs: RunCount,
    /// Digital channel → `(ticks, high)` steps
    #[serde(default)]
    pub digital: BTreeMap<u8, Vec<(u64, bool)>>,
    /// Analog channel → `(ticks, volts)` steps
    #[serde(default)]
    pub analog: BTreeMap<u8, Vec<(u64, f64)>>,
    /// State after the last run
    #[serde(default, rename = "final")]
    pub final_state: FinalState,
}

fn one_run() -> RunCount {
    RunCount::Times(1)
}

fn deserialize_runs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RunCount, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Runs {
        Times(u64),
        Word(String),
    }

    match Runs::deserialize(deserializer)? {
        Runs::Times(n) => Ok(RunCount::Times(n)),
        Runs::Word(word) if word.eq_ignore_ascii_case("infinite") => Ok(RunCount::Infinite),
        Runs::Word(word) => Err(serde::de::Error::custom(format!(
            "runs must be a positive integer or 'infinite', found '{}'",
            word
        ))),
    }
}

impl SequenceFile {
    /// Parse sequence YAML.
    pub fn from_yaml(source: &str) -> AppResult<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Read and parse a sequence file.
    pub async fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await?;
        let file = Self::from_yaml(&source)?;
        debug!(
            path = %path.display(),
            digital = file.digital.len(),
            analog = file.analog.len(),
            "loaded sequence file"
        );
        Ok(file)
    }

    /// Compile into the message sent with `stream`.
    pub fn compile(&self) -> AppResult<SequenceMessage> {
        let mut builder = SequenceBuilder::new();
        for (&channel, pattern) in &self.digital {
            builder.set_digital(channel, pattern)?;
        }
        for (&channel, pattern) in &self.analog {
            builder.set_analog(channel, pattern)?;
        }

        let mut final_state = OutputState::high(&self.final_state.digital)?;
        final_state.analog = self.final_state.analog;
        Ok(builder.build(self.runs, final_state)?)
    }
}
