//! Diagnostics and primitive value checks.
//!
//! A station file is checked in one pass that collects every finding instead
//! of stopping at the first. Findings are [`Diagnostic`]s gathered into a
//! [`ValidationReport`]; the rule engine that produces them lives in
//! [`crate::station::validator`].

use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::ops::RangeInclusive;

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, never fails a check
    Info,
    /// Suspicious but loadable; fails only in strict mode
    Warning,
    /// The host framework would refuse or misbehave
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

/// Stable identifier of the rule that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticCode {
    /// `module.Class` written more than once in a block
    DuplicateClass,
    /// Any other key repeated in one mapping
    DuplicateKey,
    /// Instance name repeated within a layer
    DuplicateModule,
    /// Instance name used in several layers
    AmbiguousName,
    /// Neither `module.Class` nor `remote`
    MissingClass,
    /// `module.Class` is not a dotted class path
    InvalidClass,
    /// `remote` is not an rpyc URL
    InvalidRemote,
    /// Block or `connect` entry of the wrong shape
    MalformedModule,
    /// `connect` names no declared module
    UnknownTarget,
    /// Module connects to itself
    SelfConnection,
    /// Connection points up the hardware, logic, gui stack
    LayerDirection,
    /// Modules connect to each other in a loop
    DependencyCycle,
    /// Top-level section other than the four layers
    UnknownSection,
    /// `global.startup` names no declared module
    UnknownStartup,
    /// `global.module_server` address or port unusable
    InvalidModuleServer,
    /// Class not described by the catalog
    UnknownClass,
    /// Declared option not set
    MissingOption,
    /// `connect` role the class does not declare
    UnknownConnector,
    /// Required connector left open
    Unconnected,
    /// Target class lacks the connector's interface
    InterfaceMismatch,
}

impl DiagnosticCode {
    /// Kebab-case name used in text and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::DuplicateClass => "duplicate-class",
            DiagnosticCode::DuplicateKey => "duplicate-key",
            DiagnosticCode::DuplicateModule => "duplicate-module",
            DiagnosticCode::AmbiguousName => "ambiguous-name",
            DiagnosticCode::MissingClass => "missing-class",
            DiagnosticCode::InvalidClass => "invalid-class",
            DiagnosticCode::InvalidRemote => "invalid-remote",
            DiagnosticCode::MalformedModule => "malformed-module",
            DiagnosticCode::UnknownTarget => "unknown-target",
            DiagnosticCode::SelfConnection => "self-connection",
            DiagnosticCode::LayerDirection => "layer-direction",
            DiagnosticCode::DependencyCycle => "dependency-cycle",
            DiagnosticCode::UnknownSection => "unknown-section",
            DiagnosticCode::UnknownStartup => "unknown-startup",
            DiagnosticCode::InvalidModuleServer => "invalid-module-server",
            DiagnosticCode::UnknownClass => "unknown-class",
            DiagnosticCode::MissingOption => "missing-option",
            DiagnosticCode::UnknownConnector => "unknown-connector",
            DiagnosticCode::Unconnected => "unconnected",
            DiagnosticCode::InterfaceMismatch => "interface-mismatch",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding about a station file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// How serious the finding is
    pub severity: Severity,
    /// Rule that produced it
    pub code: DiagnosticCode,
    /// Module instance concerned, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// 1-based line in the station file, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Human-readable description
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic without module or line information.
    pub fn new(severity: Severity, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            module: None,
            line: None,
            message: message.into(),
        }
    }

    /// Shorthand for an error-level diagnostic.
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// Shorthand for a warning-level diagnostic.
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    /// Attach the module instance name.
    pub fn for_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Attach a line number; `None` leaves the diagnostic unchanged.
    pub fn at_line(mut self, line: Option<usize>) -> Self {
        if line.is_some() {
            self.line = line;
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "{}: ", line)?;
        }
        write!(f, "{}[{}]", self.severity, self.code)?;
        if let Some(module) = &self.module {
            write!(f, " {}", module)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// All findings for one station file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// File the report is about, if it came from disk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Create an empty report.
    pub fn new(origin: Option<String>) -> Self {
        Self {
            origin,
            diagnostics: Vec::new(),
        }
    }

    /// Record a finding.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Sort findings by line (unknown lines last), then by rule code, then module.
    pub fn sort(&mut self) {
        self.diagnostics.sort_by(|a, b| {
            let line_a = a.line.unwrap_or(usize::MAX);
            let line_b = b.line.unwrap_or(usize::MAX);
            line_a
                .cmp(&line_b)
                .then(a.code.cmp(&b.code))
                .then(a.module.cmp(&b.module))
        });
    }

    /// All findings in report order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Findings of error severity.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.with_severity(Severity::Error)
    }

    /// Findings of warning severity.
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.with_severity(Severity::Warning)
    }

    fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }

    /// Findings produced by one rule.
    pub fn with_code(&self, code: DiagnosticCode) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.code == code).collect()
    }

    /// True if any error was found.
    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// True if the report passes: no errors, and in strict mode no warnings either.
    pub fn is_clean(&self, strict: bool) -> bool {
        !self.has_errors() && !(strict && self.warnings().next().is_some())
    }

    /// One-line count of errors and warnings.
    pub fn summary(&self) -> String {
        format!(
            "{} error(s), {} warning(s)",
            self.errors().count(),
            self.warnings().count()
        )
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = self.origin.as_deref().unwrap_or("<station>");
        for diagnostic in &self.diagnostics {
            // `origin:line: ...` with a line, `origin: ...` without
            let separator = if diagnostic.line.is_some() { ":" } else { ": " };
            writeln!(f, "{}{}{}", origin, separator, diagnostic)?;
        }
        write!(f, "{}: {}", origin, self.summary())
    }
}

/// Checks that a TCP port is usable. Port 0 is reserved.
pub fn is_valid_port(port: u64) -> Result<(), &'static str> {
    match port {
        1..=65535 => Ok(()),
        0 => Err("Port number must be greater than 0"),
        _ => Err("Port number must not exceed 65535"),
    }
}

/// Checks that a string is an IP address or a plausible DNS host name.
pub fn is_valid_host(host: &str) -> Result<(), &'static str> {
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if host.is_empty() || host.len() > 253 {
        return Err("Host name must be 1 to 253 characters");
    }
    let labels_ok = host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if labels_ok {
        Ok(())
    } else {
        Err("Invalid host name")
    }
}

/// Checks that a path string is usable.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Checks that a string is a Python-style identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_identifier(value: &str) -> Result<(), &'static str> {
    let mut chars = value.chars();
    match chars.next() {
        None => Err("Identifier cannot be empty"),
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => {
            Err("Identifier must start with a letter or underscore")
        }
        Some(_) if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') => Ok(()),
        Some(_) => Err("Identifier may only contain letters, digits and underscores"),
    }
}

/// Checks that a value lies within an inclusive range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}
