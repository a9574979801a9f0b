//! Module class catalog loaded from YAML files.
//!
//! A station file only names classes. To check option names and connector
//! roles the validator needs to know what each class declares: its config
//! options (with the policy applied when an option is missing) and its
//! connectors (with the interface the connected module must provide).
//!
//! Catalog files hold a list of class descriptions:
//!
//! ```yaml
//! classes:
//!   - class: hardware.ni_process.NIProcess
//!     modclass: NIProcess
//!     interfaces: [ProcessInterface, ProcessControlInterface]
//!     options:
//!       - name: inputChannel
//!         missing: error
//!       - name: outputMinimum
//!         default: 0.0
//!         missing: warning
//!   - class: logic.hbt_logic.HbtLogic
//!     connectors:
//!       - name: savelogic
//!         interface: SaveLogic
//! ```
//!
//! # Search Path Priority
//!
//! Search paths are processed in order, with earlier paths having higher
//! priority. If the same class appears in several paths the higher-priority
//! description wins.

use super::{ClassPath, Layer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// What the host does when a config option is absent from a module block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    /// Refuse to activate the module
    Error,
    /// Log a warning and use the default
    Warn,
    /// Log an info message and use the default
    Info,
    /// Use the default silently
    #[default]
    Nothing,
}

impl FromStr for MissingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(MissingPolicy::Error),
            "warn" | "warning" => Ok(MissingPolicy::Warn),
            "info" => Ok(MissingPolicy::Info),
            "nothing" => Ok(MissingPolicy::Nothing),
            other => Err(format!(
                "unknown missing policy '{}', expected error, warn, info or nothing",
                other
            )),
        }
    }
}

impl<'de> Deserialize<'de> for MissingPolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A config option declared by a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    /// Key in the module block
    pub name: String,
    /// Value used when the key is absent
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
    /// Reaction to a missing key
    #[serde(default)]
    pub missing: MissingPolicy,
}

/// A connector declared by a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    /// Role name used under `connect`
    pub name: String,
    /// Interface or class name the connected module must provide
    pub interface: String,
    /// Whether the module works without this connection
    #[serde(default)]
    pub optional: bool,
}

/// Everything the validator knows about one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    /// Full class path, e.g. `hardware.ni_process.NIProcess`
    pub class: String,
    /// Legacy `_modclass` alias other classes may name as interface
    #[serde(default)]
    pub modclass: Option<String>,
    /// Interfaces the class implements
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Declared connectors
    #[serde(default)]
    pub connectors: Vec<ConnectorSpec>,
    /// Declared config options
    #[serde(default)]
    pub options: Vec<OptionSpec>,
}

impl ClassSpec {
    /// Whether a connector asking for `interface` accepts this class.
    pub fn provides(&self, interface: &str) -> bool {
        let short_name = self.class.rsplit('.').next().unwrap_or(&self.class);
        short_name == interface
            || self.modclass.as_deref() == Some(interface)
            || self.interfaces.iter().any(|i| i == interface)
    }

    /// Connector lookup by role name.
    pub fn connector(&self, name: &str) -> Option<&ConnectorSpec> {
        self.connectors.iter().find(|c| c.name == name)
    }

    /// Problems with the description itself; empty if usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Err(msg) = self.class.parse::<ClassPath>() {
            errors.push(format!("class: {}", msg));
        }

        let mut seen = HashSet::new();
        for connector in &self.connectors {
            if connector.name.trim().is_empty() {
                errors.push("connectors: empty connector name".to_string());
            } else if !seen.insert(connector.name.as_str()) {
                errors.push(format!("connectors: duplicate connector '{}'", connector.name));
            }
            if connector.interface.trim().is_empty() {
                errors.push(format!(
                    "connectors.{}: interface must not be empty",
                    connector.name
                ));
            }
        }

        let mut seen = HashSet::new();
        for option in &self.options {
            if option.name.trim().is_empty() {
                errors.push("options: empty option name".to_string());
            } else if !seen.insert(option.name.as_str()) {
                errors.push(format!("options: duplicate option '{}'", option.name));
            }
        }
        errors
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    classes: Vec<ClassSpec>,
}

/// Error that occurred while loading a catalog file
#[derive(Debug, Clone)]
pub struct CatalogLoadError {
    /// Path to the file that failed to load
    pub file_path: PathBuf,
    /// The error message
    pub message: String,
    /// Per-class validation errors (if any)
    pub validation_errors: Vec<String>,
}

impl fmt::Display for CatalogLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file_path.display(), self.message)?;
        for err in &self.validation_errors {
            write!(f, "\n  - {}", err)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    spec: ClassSpec,
    source_path: Option<PathBuf>,
    priority: usize,
}

/// Class descriptions indexed by full class path.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    classes: BTreeMap<String, CatalogEntry>,
    search_paths: Vec<PathBuf>,
}

impl ModuleCatalog {
    /// Creates a new, empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory to scan; paths added first have higher priority.
    pub fn add_search_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.search_paths.push(path.into());
    }

    /// Adds a class programmatically. It outranks anything loaded from disk.
    pub fn insert(&mut self, spec: ClassSpec) {
        self.classes.insert(
            spec.class.clone(),
            CatalogEntry {
                spec,
                source_path: None,
                priority: 0,
            },
        );
    }

    /// Number of known classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True if no class is known.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// All class descriptions, sorted by class path.
    pub fn classes(&self) -> impl Iterator<Item = &ClassSpec> {
        self.classes.values().map(|entry| &entry.spec)
    }

    /// Exact lookup by full class path.
    pub fn get(&self, class: &str) -> Option<&ClassSpec> {
        self.classes.get(class).map(|entry| &entry.spec)
    }

    /// File a class was loaded from.
    pub fn source_of(&self, class: &str) -> Option<&Path> {
        self.classes
            .get(class)
            .and_then(|entry| entry.source_path.as_deref())
    }

    /// Lookup for a `module.Class` value as written in a station file.
    ///
    /// Station files usually omit the layer package (`ni_process.NIProcess`
    /// under `hardware`), so the layer-qualified path is tried as well.
    pub fn resolve(&self, layer: Layer, class: &str) -> Option<&ClassSpec> {
        self.get(class)
            .or_else(|| self.get(&format!("{}.{}", layer.as_str(), class)))
    }

    /// Scans all search paths and loads catalog files.
    ///
    /// Returns the errors of files that failed to load; valid files are
    /// loaded regardless.
    pub async fn scan(&mut self) -> Vec<CatalogLoadError> {
        let mut errors = Vec::new();
        // Clone paths to avoid borrow conflict with scan_directory(&mut self)
        let paths: Vec<_> = self.search_paths.iter().cloned().enumerate().collect();
        for (priority, path) in paths {
            errors.extend(self.scan_directory(&path, priority + 1).await);
        }
        info!(classes = self.classes.len(), "module catalog loaded");
        errors
    }

    async fn scan_directory(&mut self, path: &Path, priority: usize) -> Vec<CatalogLoadError> {
        let mut errors = Vec::new();

        if !path.exists() {
            // Non-existent paths are silently skipped
            debug!("Catalog path does not exist: {}", path.display());
            return errors;
        }

        if path.is_file() {
            if let Err(e) = self.load_file(path, priority).await {
                errors.push(e);
            }
            return errors;
        }

        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) => {
                errors.push(CatalogLoadError {
                    file_path: path.to_path_buf(),
                    message: format!("Failed to read directory: {}", e),
                    validation_errors: vec![],
                });
                return errors;
            }
        };

        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let entry_path = entry.path();
            let is_yaml = entry_path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if entry_path.is_file() && is_yaml {
                files.push(entry_path);
            }
        }
        // Directory order is platform dependent
        files.sort();

        for file in files {
            if let Err(e) = self.load_file(&file, priority).await {
                errors.push(e);
            }
        }
        errors
    }

    async fn load_file(&mut self, path: &Path, priority: usize) -> Result<(), CatalogLoadError> {
        let fail = |message: String, validation_errors: Vec<String>| CatalogLoadError {
            file_path: path.to_path_buf(),
            message,
            validation_errors,
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| fail(format!("Failed to read file: {}", e), vec![]))?;
        let file: CatalogFile = serde_yaml::from_str(&content)
            .map_err(|e| fail(format!("Failed to parse YAML: {}", e), vec![]))?;

        let validation_errors: Vec<String> = file
            .classes
            .iter()
            .flat_map(|spec| {
                spec.validate()
                    .into_iter()
                    .map(move |err| format!("{}: {}", spec.class, err))
            })
            .collect();
        if !validation_errors.is_empty() {
            return Err(fail(
                format!("Validation failed with {} error(s)", validation_errors.len()),
                validation_errors,
            ));
        }

        for spec in file.classes {
            if let Some(existing) = self.classes.get(&spec.class) {
                if existing.priority <= priority {
                    debug!(
                        "Skipping class '{}' from {} (already known with higher priority)",
                        spec.class,
                        path.display()
                    );
                    continue;
                }
            }
            self.classes.insert(
                spec.class.clone(),
                CatalogEntry {
                    spec,
                    source_path: Some(path.to_path_buf()),
                    priority,
                },
            );
        }
        debug!("Loaded catalog file {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hbt_logic() -> ClassSpec {
        serde_yaml::from_str(
            r#"
class: logic.hbt_logic.HbtLogic
modclass: hbtlogic
options:
  - name: timetagger_channel_apd_0
    missing: error
  - name: bin_width
    default: 500
    missing: info
connectors:
  - name: savelogic
    interface: SaveLogic
"#,
        )
        .unwrap()
    }

    #[test]
    fn missing_policy_parsing() {
        assert_eq!("warning".parse::<MissingPolicy>(), Ok(MissingPolicy::Warn));
        assert_eq!("WARN".parse::<MissingPolicy>(), Ok(MissingPolicy::Warn));
        assert_eq!("nothing".parse::<MissingPolicy>(), Ok(MissingPolicy::Nothing));
        assert!("fatal".parse::<MissingPolicy>().is_err());
    }

    #[test]
    fn class_spec_deserializes_with_defaults() {
        let spec = hbt_logic();
        assert_eq!(spec.options[1].missing, MissingPolicy::Info);
        assert_eq!(spec.options[1].default, Some(serde_yaml::Value::from(500)));
        assert!(!spec.connectors[0].optional);
        assert!(spec.validate().is_empty());
    }

    #[test]
    fn provides_matches_name_alias_and_interfaces() {
        let mut spec = hbt_logic();
        spec.interfaces.push("CorrelationInterface".into());
        assert!(spec.provides("HbtLogic"));
        assert!(spec.provides("hbtlogic"));
        assert!(spec.provides("CorrelationInterface"));
        assert!(!spec.provides("SaveLogic"));
    }

    #[test]
    fn validate_reports_duplicates_and_bad_paths() {
        let mut spec = hbt_logic();
        spec.class = "HbtLogic".into();
        spec.connectors.push(spec.connectors[0].clone());
        spec.options.push(OptionSpec {
            name: String::new(),
            default: None,
            missing: MissingPolicy::Nothing,
        });
        let errors = spec.validate();
        assert_eq!(errors.len(), 3, "{errors:?}");
    }

    #[test]
    fn resolve_tries_layer_prefix() {
        let mut catalog = ModuleCatalog::new();
        catalog.insert(hbt_logic());
        assert!(catalog.resolve(Layer::Logic, "hbt_logic.HbtLogic").is_some());
        assert!(catalog
            .resolve(Layer::Logic, "logic.hbt_logic.HbtLogic")
            .is_some());
        assert!(catalog.resolve(Layer::Gui, "hbt_logic.HbtLogic").is_none());
        assert_eq!(catalog.len(), 1);
    }
}
