//! Station configuration model.
//!
//! A qudi station file declares module instances in three layers
//! (`hardware`, `logic`, `gui`) plus a `global` section. Every instance names
//! its implementing class in `module.Class` and may list `connect` edges to
//! other instances by role:
//!
//! ```yaml
//! hardware:
//!     mydummyscanner:
//!         module.Class: 'confocal_scanner_dummy.ConfocalScannerDummy'
//! logic:
//!     scanner:
//!         module.Class: 'confocal_logic.ConfocalLogic'
//!         connect:
//!             confocalscanner1: 'mydummyscanner'
//! ```
//!
//! This module holds the parsed, line-annotated form of such a file. Loading
//! is in [`loader`], the duplicate-key aware line scan in [`scanner`], the
//! connect graph in [`dependencies`] and the rule engine in [`validator`].

pub mod catalog;
pub mod dependencies;
pub mod loader;
pub mod scanner;
pub mod validator;

use crate::validation::is_identifier;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use catalog::{ClassSpec, ConnectorSpec, MissingPolicy, ModuleCatalog, OptionSpec};
pub use dependencies::{CycleError, DependencyGraph};
pub use loader::{load_file, parse_str};
pub use scanner::{DuplicateKey, KeyIndex};
pub use validator::Validator;

/// Key naming the implementing class of a module.
pub const CLASS_KEY: &str = "module.Class";
/// Key holding the role → instance mapping.
pub const CONNECT_KEY: &str = "connect";
/// Key marking a module served by another qudi instance.
pub const REMOTE_KEY: &str = "remote";

/// Top-level section of a station file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Framework-wide settings; holds no modules
    Global,
    /// Instrument drivers
    Hardware,
    /// Measurement and control logic
    Logic,
    /// User interface panels
    Gui,
}

impl Layer {
    /// The three layers that hold module instances, in activation order.
    pub const MODULE_LAYERS: [Layer; 3] = [Layer::Hardware, Layer::Logic, Layer::Gui];

    /// Section name as written in station files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Global => "global",
            Layer::Hardware => "hardware",
            Layer::Logic => "logic",
            Layer::Gui => "gui",
        }
    }

    /// Position in the hardware → logic → gui stack. `Global` has none.
    pub fn rank(&self) -> Option<u8> {
        match self {
            Layer::Global => None,
            Layer::Hardware => Some(0),
            Layer::Logic => Some(1),
            Layer::Gui => Some(2),
        }
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Layer::Global),
            "hardware" => Ok(Layer::Hardware),
            "logic" => Ok(Layer::Logic),
            "gui" => Ok(Layer::Gui),
            other => Err(format!("unknown section '{}'", other)),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `package.module.ClassName` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassPath {
    segments: Vec<String>,
}

impl ClassPath {
    /// Dotted module path without the class name, e.g. `hardware.ni_process`.
    pub fn module_path(&self) -> String {
        self.segments[..self.segments.len() - 1].join(".")
    }

    /// Final segment, e.g. `NIProcess`.
    pub fn class_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }
}

impl FromStr for ClassPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.trim().split('.').map(str::to_string).collect();
        if segments.len() < 2 {
            return Err(format!(
                "'{}' is not of the form package.module.ClassName",
                s
            ));
        }
        for segment in &segments {
            is_identifier(segment).map_err(|msg| format!("'{}' in '{}': {}", segment, s, msg))?;
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for ClassPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Target of a `connect` edge.
///
/// Both `instance` and the older `instance.connector` spelling are accepted;
/// the suffix is kept but only the instance takes part in graph checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectTarget {
    /// Instance name the role is wired to
    pub instance: String,
    /// Legacy connector suffix, if written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
}

impl ConnectTarget {
    /// Parse a connect value.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.split_once('.') {
            Some((instance, connector)) => Self {
                instance: instance.to_string(),
                connector: Some(connector.to_string()),
            },
            None => Self {
                instance: raw.to_string(),
                connector: None,
            },
        }
    }
}

/// One `connect` entry of a module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    /// Role name on the connecting module
    pub role: String,
    /// Instance wired to the role
    pub target: ConnectTarget,
    /// 1-based line of the entry
    pub line: Option<usize>,
}

/// A module instance declared in one of the module layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleEntry {
    /// Instance name
    pub name: String,
    /// Section the instance is declared in
    pub layer: Layer,
    /// Effective `module.Class` value
    pub class: Option<String>,
    /// `remote` URL for modules served by another qudi instance
    pub remote: Option<String>,
    /// Every other key of the module block
    pub options: BTreeMap<String, serde_yaml::Value>,
    /// `connect` entries in declaration order
    pub connect: Vec<Connection>,
    /// 1-based line of the instance name
    pub line: Option<usize>,
    /// Shape problems found while loading (body not a mapping, ...)
    pub problems: Vec<String>,
}

impl ModuleEntry {
    /// New entry with nothing but its name and layer.
    pub fn new(name: impl Into<String>, layer: Layer) -> Self {
        Self {
            name: name.into(),
            layer,
            class: None,
            remote: None,
            options: BTreeMap::new(),
            connect: Vec::new(),
            line: None,
            problems: Vec::new(),
        }
    }

    /// Parsed class path, if present and well formed.
    pub fn class_path(&self) -> Option<ClassPath> {
        self.class.as_deref().and_then(|c| c.parse().ok())
    }

    /// Connected role lookup.
    pub fn connection(&self, role: &str) -> Option<&Connection> {
        self.connect.iter().find(|c| c.role == role)
    }
}

/// A parsed station file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StationConfig {
    /// Where the station was read from, for messages
    pub origin: Option<String>,
    /// The `global` section as written
    pub global: serde_yaml::Mapping,
    /// 1-based line of the `global` section
    pub global_line: Option<usize>,
    /// Module instances of all layers in file order
    pub modules: Vec<ModuleEntry>,
    /// Keys written more than once in the same mapping
    pub duplicate_keys: Vec<DuplicateKey>,
    /// Top-level sections other than the four layers, with their lines
    pub unknown_sections: Vec<(String, Option<usize>)>,
}

impl StationConfig {
    /// First module with the given instance name, in any layer.
    pub fn module(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Whether any layer declares the instance name.
    pub fn contains(&self, name: &str) -> bool {
        self.module(name).is_some()
    }

    /// Modules of one layer in file order.
    pub fn modules_in(&self, layer: Layer) -> impl Iterator<Item = &ModuleEntry> {
        self.modules.iter().filter(move |m| m.layer == layer)
    }

    /// Instance names in file order (duplicates included).
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_path_parsing() {
        let path: ClassPath = "hardware.ni_process.NIProcess".parse().unwrap();
        assert_eq!(path.module_path(), "hardware.ni_process");
        assert_eq!(path.class_name(), "NIProcess");
        assert_eq!(path.to_string(), "hardware.ni_process.NIProcess");

        let short: ClassPath = "counter_logic.CounterLogic".parse().unwrap();
        assert_eq!(short.module_path(), "counter_logic");

        assert!("NIProcess".parse::<ClassPath>().is_err());
        assert!("hardware..NIProcess".parse::<ClassPath>().is_err());
        assert!("hardware.ni-process.NIProcess".parse::<ClassPath>().is_err());
    }

    #[test]
    fn connect_target_spellings() {
        let plain = ConnectTarget::parse("mydummyscanner");
        assert_eq!(plain.instance, "mydummyscanner");
        assert!(plain.connector.is_none());

        let legacy = ConnectTarget::parse(" nicard.counter ");
        assert_eq!(legacy.instance, "nicard");
        assert_eq!(legacy.connector.as_deref(), Some("counter"));
    }

    #[test]
    fn layer_roundtrip_and_rank() {
        for layer in Layer::MODULE_LAYERS {
            assert_eq!(layer.as_str().parse::<Layer>(), Ok(layer));
        }
        assert!("Hardware".parse::<Layer>().is_err());
        assert!(Layer::Hardware.rank() < Layer::Gui.rank());
        assert_eq!(Layer::Global.rank(), None);
    }
}
