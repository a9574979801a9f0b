//! Rule engine turning a [`StationConfig`] into a [`ValidationReport`].
//!
//! Graph rules (targets exist, no self edges, no cycles, one effective
//! `module.Class` per block) always run. Rules that need to know what a class
//! declares run only when a [`ModuleCatalog`] is attached.

use super::catalog::{MissingPolicy, ModuleCatalog};
use super::{ClassPath, DependencyGraph, Layer, ModuleEntry, StationConfig, CLASS_KEY};
use crate::validation::{
    is_valid_host, is_valid_port, Diagnostic, DiagnosticCode, Severity, ValidationReport,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::debug;

static REMOTE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rpyc://([^:/\s]+|\[[0-9A-Fa-f:]+\]):([0-9]+)/([^\s/]+)$")
        .expect("Invalid remote url regex")
});

/// Checks station files.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator<'a> {
    catalog: Option<&'a ModuleCatalog>,
}

impl<'a> Validator<'a> {
    /// Validator running the graph rules only.
    pub fn new() -> Self {
        Self { catalog: None }
    }

    /// Also check options and connectors against class descriptions.
    pub fn with_catalog(mut self, catalog: &'a ModuleCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Run every rule and return the sorted findings.
    pub fn validate(&self, station: &StationConfig) -> ValidationReport {
        let mut report = ValidationReport::new(station.origin.clone());

        check_duplicate_keys(station, &mut report);
        check_unknown_sections(station, &mut report);
        check_ambiguous_names(station, &mut report);
        for module in &station.modules {
            check_module_shape(module, &mut report);
            check_connections(station, module, &mut report);
        }
        check_cycles(station, &mut report);
        check_global(station, &mut report);

        if let Some(catalog) = self.catalog {
            for module in &station.modules {
                check_against_catalog(catalog, station, module, &mut report);
            }
        }

        report.sort();
        debug!(
            origin = station.origin.as_deref().unwrap_or("<station>"),
            diagnostics = report.diagnostics().len(),
            "station validated"
        );
        report
    }
}

fn check_duplicate_keys(station: &StationConfig, report: &mut ValidationReport) {
    for duplicate in &station.duplicate_keys {
        let lines = duplicate
            .lines
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let effective = duplicate.effective_line().unwrap_or_default();
        let repeated_at = duplicate.lines.get(1).copied();
        let in_module_layer = duplicate
            .path
            .first()
            .and_then(|section| section.parse::<Layer>().ok())
            .is_some_and(|layer| layer.rank().is_some());

        let diagnostic = match duplicate.path.as_slice() {
            [_, module, key] if in_module_layer && key == CLASS_KEY => Diagnostic::error(
                DiagnosticCode::DuplicateClass,
                format!(
                    "{} defined {} times (lines {}); the value on line {} is used",
                    CLASS_KEY,
                    duplicate.lines.len(),
                    lines,
                    effective
                ),
            )
            .for_module(module.as_str()),
            [layer, module] if in_module_layer => Diagnostic::error(
                DiagnosticCode::DuplicateModule,
                format!(
                    "module declared {} times in '{}' (lines {}); only the block on line {} is loaded",
                    duplicate.lines.len(),
                    layer,
                    lines,
                    effective
                ),
            )
            .for_module(module.as_str()),
            path => {
                let mut diagnostic = Diagnostic::warning(
                    DiagnosticCode::DuplicateKey,
                    format!(
                        "key '{}' repeated (lines {}); the value on line {} is used",
                        path.join("."),
                        lines,
                        effective
                    ),
                );
                if in_module_layer && path.len() > 2 {
                    diagnostic = diagnostic.for_module(path[1].as_str());
                }
                diagnostic
            }
        };
        report.push(diagnostic.at_line(repeated_at));
    }
}

fn check_unknown_sections(station: &StationConfig, report: &mut ValidationReport) {
    for (section, line) in &station.unknown_sections {
        report.push(
            Diagnostic::warning(
                DiagnosticCode::UnknownSection,
                format!(
                    "section '{}' is ignored; expected global, hardware, logic or gui",
                    section
                ),
            )
            .at_line(*line),
        );
    }
}

fn check_ambiguous_names(station: &StationConfig, report: &mut ValidationReport) {
    let mut by_name: BTreeMap<&str, Vec<&ModuleEntry>> = BTreeMap::new();
    for module in &station.modules {
        by_name.entry(module.name.as_str()).or_default().push(module);
    }
    for (name, entries) in by_name {
        if entries.len() < 2 {
            continue;
        }
        let layers = entries
            .iter()
            .map(|m| m.layer.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        report.push(
            Diagnostic::warning(
                DiagnosticCode::AmbiguousName,
                format!(
                    "name used in several layers ({}); connect targets resolve to the {} module",
                    layers, entries[0].layer
                ),
            )
            .for_module(name)
            .at_line(entries[1].line),
        );
    }
}

fn check_module_shape(module: &ModuleEntry, report: &mut ValidationReport) {
    for problem in &module.problems {
        report.push(
            Diagnostic::error(DiagnosticCode::MalformedModule, problem.as_str())
                .for_module(module.name.as_str())
                .at_line(module.line),
        );
    }

    if let Some(url) = &module.remote {
        if let Err(msg) = check_remote_url(url) {
            report.push(
                Diagnostic::error(DiagnosticCode::InvalidRemote, msg)
                    .for_module(module.name.as_str())
                    .at_line(module.line),
            );
        }
    }

    match &module.class {
        None if module.remote.is_none() => report.push(
            Diagnostic::error(
                DiagnosticCode::MissingClass,
                format!("module block has no {} and no remote", CLASS_KEY),
            )
            .for_module(module.name.as_str())
            .at_line(module.line),
        ),
        Some(class) => {
            if let Err(msg) = class.parse::<ClassPath>() {
                report.push(
                    Diagnostic::error(DiagnosticCode::InvalidClass, msg)
                        .for_module(module.name.as_str())
                        .at_line(module.line),
                );
            }
        }
        None => {}
    }
}

fn check_remote_url(url: &str) -> Result<(), String> {
    let captures = REMOTE_URL
        .captures(url.trim())
        .ok_or_else(|| format!("remote '{}' is not of the form rpyc://host:port/name", url))?;
    let host = captures[1].trim_start_matches('[').trim_end_matches(']');
    is_valid_host(host).map_err(|msg| format!("remote '{}': {}", url, msg))?;
    let port = captures[2]
        .parse::<u64>()
        .map_err(|_| format!("remote '{}': port is not a number", url))?;
    is_valid_port(port).map_err(|msg| format!("remote '{}': {}", url, msg))?;
    Ok(())
}

fn check_connections(station: &StationConfig, module: &ModuleEntry, report: &mut ValidationReport) {
    for connection in &module.connect {
        let target_name = connection.target.instance.as_str();
        if target_name == module.name {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::SelfConnection,
                    format!("role '{}' connects the module to itself", connection.role),
                )
                .for_module(module.name.as_str())
                .at_line(connection.line),
            );
            continue;
        }

        let Some(target) = station.module(target_name) else {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::UnknownTarget,
                    format!(
                        "role '{}' connects to '{}', which is not declared in any layer",
                        connection.role, target_name
                    ),
                )
                .for_module(module.name.as_str())
                .at_line(connection.line),
            );
            continue;
        };

        if module.layer.rank() < target.layer.rank() {
            report.push(
                Diagnostic::warning(
                    DiagnosticCode::LayerDirection,
                    format!(
                        "{} module connects upward to {} module '{}'",
                        module.layer, target.layer, target.name
                    ),
                )
                .for_module(module.name.as_str())
                .at_line(connection.line),
            );
        }
    }
}

fn check_cycles(station: &StationConfig, report: &mut ValidationReport) {
    let mut graph = DependencyGraph::new();
    for module in &station.modules {
        graph.add_node(&module.name);
        for connection in &module.connect {
            // Self edges have their own rule
            if connection.target.instance != module.name {
                graph.add_assignment(&module.name, &connection.role, &connection.target.instance);
            }
        }
    }

    if let Err(cycle) = graph.load_order() {
        let first = cycle
            .members
            .first()
            .and_then(|name| station.module(name))
            .and_then(|m| m.line);
        report.push(
            Diagnostic::error(
                DiagnosticCode::DependencyCycle,
                format!(
                    "modules cannot be activated because their connections form a cycle: {}",
                    cycle.members.join(", ")
                ),
            )
            .at_line(first),
        );
    }
}

fn check_global(station: &StationConfig, report: &mut ValidationReport) {
    if let Some(startup) = station.global.get("startup") {
        let names: Vec<&Value> = match startup {
            Value::Sequence(items) => items.iter().collect(),
            Value::String(_) => vec![startup],
            Value::Null => Vec::new(),
            _ => {
                report.push(
                    Diagnostic::error(
                        DiagnosticCode::UnknownStartup,
                        "global.startup must be a list of module names",
                    )
                    .at_line(station.global_line),
                );
                Vec::new()
            }
        };
        for name in names {
            let known = name.as_str().is_some_and(|n| station.contains(n));
            if !known {
                report.push(
                    Diagnostic::error(
                        DiagnosticCode::UnknownStartup,
                        format!(
                            "startup module {} is not declared in any layer",
                            describe_value(name)
                        ),
                    )
                    .at_line(station.global_line),
                );
            }
        }
    }

    if let Some(server) = station.global.get("module_server") {
        if let Err(msg) = check_module_server(server) {
            report.push(
                Diagnostic::error(DiagnosticCode::InvalidModuleServer, msg)
                    .at_line(station.global_line),
            );
        }
    }
}

fn check_module_server(server: &Value) -> Result<(), String> {
    let Value::Mapping(map) = server else {
        return Err("global.module_server must be a mapping with address and port".to_string());
    };
    let address = map
        .get("address")
        .ok_or("global.module_server has no address")?;
    let address = address
        .as_str()
        .ok_or_else(|| format!("module_server address {} is not a string", describe_value(address)))?;
    is_valid_host(address).map_err(|msg| format!("module_server address '{}': {}", address, msg))?;

    let port = map.get("port").ok_or("global.module_server has no port")?;
    let port = port
        .as_u64()
        .ok_or_else(|| format!("module_server port {} is not a positive integer", describe_value(port)))?;
    is_valid_port(port).map_err(|msg| format!("module_server port {}: {}", port, msg))?;
    Ok(())
}

fn check_against_catalog(
    catalog: &ModuleCatalog,
    station: &StationConfig,
    module: &ModuleEntry,
    report: &mut ValidationReport,
) {
    let Some(class) = module.class.as_deref() else {
        return;
    };
    let Some(spec) = catalog.resolve(module.layer, class) else {
        report.push(
            Diagnostic::new(
                Severity::Info,
                DiagnosticCode::UnknownClass,
                format!("class '{}' is not in the catalog; options and connectors unchecked", class),
            )
            .for_module(module.name.as_str())
            .at_line(module.line),
        );
        return;
    };

    for option in &spec.options {
        if module.options.contains_key(&option.name) {
            continue;
        }
        let severity = match option.missing {
            MissingPolicy::Error => Severity::Error,
            MissingPolicy::Warn => Severity::Warning,
            MissingPolicy::Info => Severity::Info,
            MissingPolicy::Nothing => continue,
        };
        let fallback = match &option.default {
            Some(default) => format!("; default {} applies", describe_value(default)),
            None => String::new(),
        };
        report.push(
            Diagnostic::new(
                severity,
                DiagnosticCode::MissingOption,
                format!("option '{}' is not set{}", option.name, fallback),
            )
            .for_module(module.name.as_str())
            .at_line(module.line),
        );
    }

    for connection in &module.connect {
        let Some(connector) = spec.connector(&connection.role) else {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::UnknownConnector,
                    format!("class {} declares no connector '{}'", spec.class, connection.role),
                )
                .for_module(module.name.as_str())
                .at_line(connection.line),
            );
            continue;
        };

        let target_spec = station
            .module(&connection.target.instance)
            .and_then(|target| Some((target, target.class.as_deref()?)))
            .and_then(|(target, class)| catalog.resolve(target.layer, class));
        if let Some(target_spec) = target_spec {
            if !target_spec.provides(&connector.interface) {
                report.push(
                    Diagnostic::error(
                        DiagnosticCode::InterfaceMismatch,
                        format!(
                            "connector '{}' needs {}, but '{}' is a {}",
                            connector.name,
                            connector.interface,
                            connection.target.instance,
                            target_spec.class
                        ),
                    )
                    .for_module(module.name.as_str())
                    .at_line(connection.line),
                );
            }
        }
    }

    for connector in spec.connectors.iter().filter(|c| !c.optional) {
        if module.connection(&connector.name).is_none() {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::Unconnected,
                    format!(
                        "connector '{}' ({}) is not connected",
                        connector.name, connector.interface
                    ),
                )
                .for_module(module.name.as_str())
                .at_line(module.line),
            );
        }
    }
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| "<value>".to_string()),
    }
}
