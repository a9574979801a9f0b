//! Loading station files into [`StationConfig`].
//!
//! Loading never judges the station: a module without `module.Class`, a
//! `connect` block written as a list or an unknown top-level section are all
//! kept so that the validator can report them with their line numbers. Only
//! text that is not YAML at all, or a document whose sections are not
//! mappings, fails to load.

use super::scanner::{scan_keys, strip_shadowed, KeyIndex};
use super::{
    ConnectTarget, Connection, Layer, ModuleEntry, StationConfig, CLASS_KEY, CONNECT_KEY,
    REMOTE_KEY,
};
use crate::error::{AppResult, StationError};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::debug;

/// Read and parse a station file.
pub async fn load_file(path: impl AsRef<Path>) -> AppResult<StationConfig> {
    let path = path.as_ref();
    let source = tokio::fs::read_to_string(path).await?;
    let station = parse_str(&source, Some(path.display().to_string()))?;
    debug!(
        path = %path.display(),
        modules = station.modules.len(),
        duplicate_keys = station.duplicate_keys.len(),
        "loaded station file"
    );
    Ok(station)
}

/// Parse station text. `origin` only labels messages.
pub fn parse_str(source: &str, origin: Option<String>) -> AppResult<StationConfig> {
    let index = scan_keys(source)?;
    let effective = strip_shadowed(source, &index);

    let mut station = StationConfig {
        origin,
        duplicate_keys: index.duplicates(),
        ..Default::default()
    };

    let root: Value = serde_yaml::from_str(&effective)?;
    let root = match root {
        Value::Null => return Ok(station),
        Value::Mapping(map) => map,
        other => {
            return Err(StationError::Configuration(format!(
                "station root must be a mapping of sections, found {}",
                kind_of(&other)
            )))
        }
    };

    for (section_key, section_value) in root {
        let section = key_string(&section_key).ok_or_else(|| {
            StationError::Configuration(format!(
                "section names must be strings, found {}",
                kind_of(&section_key)
            ))
        })?;
        let section_line = index.line_of(&[section.as_str()]);

        let layer = match section.parse::<Layer>() {
            Ok(layer) => layer,
            Err(_) => {
                station.unknown_sections.push((section, section_line));
                continue;
            }
        };

        let body = match section_value {
            Value::Null => Mapping::new(),
            Value::Mapping(map) => map,
            other => {
                return Err(StationError::Configuration(format!(
                    "section '{}'{} must be a mapping, found {}",
                    section,
                    at_line(section_line),
                    kind_of(&other)
                )))
            }
        };

        if layer == Layer::Global {
            station.global = body;
            station.global_line = section_line;
            continue;
        }

        for (name_key, module_value) in body {
            let name = key_string(&name_key).ok_or_else(|| {
                StationError::Configuration(format!(
                    "module names in '{}' must be strings, found {}",
                    section,
                    kind_of(&name_key)
                ))
            })?;
            let module = build_module(&index, layer, name, module_value);
            station.modules.push(module);
        }
    }

    Ok(station)
}

fn build_module(index: &KeyIndex, layer: Layer, name: String, value: Value) -> ModuleEntry {
    let mut module = ModuleEntry::new(name, layer);
    module.line = index.line_of(&[layer.as_str(), module.name.as_str()]);

    let body = match value {
        Value::Mapping(map) => map,
        Value::Null => {
            module.problems.push("module block is empty".to_string());
            return module;
        }
        other => {
            module
                .problems
                .push(format!("module block must be a mapping, found {}", kind_of(&other)));
            return module;
        }
    };

    for (key, value) in body {
        let Some(key) = key_string(&key) else {
            module
                .problems
                .push(format!("option names must be strings, found {}", kind_of(&key)));
            continue;
        };
        match key.as_str() {
            CLASS_KEY => match value {
                Value::String(class) => module.class = Some(class),
                other => module.problems.push(format!(
                    "{} must be a string, found {}",
                    CLASS_KEY,
                    kind_of(&other)
                )),
            },
            REMOTE_KEY => match value {
                Value::String(url) => module.remote = Some(url),
                other => module.problems.push(format!(
                    "{} must be a string, found {}",
                    REMOTE_KEY,
                    kind_of(&other)
                )),
            },
            CONNECT_KEY => read_connections(index, &mut module, value),
            _ => {
                module.options.insert(key, value);
            }
        }
    }

    module
}

fn read_connections(index: &KeyIndex, module: &mut ModuleEntry, value: Value) {
    let map = match value {
        Value::Mapping(map) => map,
        Value::Null => return,
        other => {
            module
                .problems
                .push(format!("connect must be a mapping, found {}", kind_of(&other)));
            return;
        }
    };

    for (role, target) in map {
        let Some(role) = key_string(&role) else {
            module
                .problems
                .push(format!("connect roles must be strings, found {}", kind_of(&role)));
            continue;
        };
        let Value::String(target) = target else {
            module.problems.push(format!(
                "connect target of role '{}' must be a module name, found {}",
                role,
                kind_of(&target)
            ));
            continue;
        };
        let line = index.line_of(&[
            module.layer.as_str(),
            module.name.as_str(),
            CONNECT_KEY,
            role.as_str(),
        ]);
        module.connect.push(Connection {
            role,
            target: ConnectTarget::parse(&target),
            line,
        });
    }
}

/// Mapping keys written as plain numbers or booleans still name things in qudi files.
fn key_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn at_line(line: Option<usize>) -> String {
    line.map(|l| format!(" (line {})", l)).unwrap_or_default()
}
