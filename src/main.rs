//! CLI entry point for qudi-station
//!
//! Provides command-line access to:
//! - Validating station configuration files
//! - Printing activation order, the connect graph and dependents of a module
//! - Compiling and inspecting Pulse Streamer sequences
//!
//! # Usage
//!
//! Check a station against a class catalog:
//! ```bash
//! qudi-station validate config/warwick_rt_confocal.cfg --catalog catalog/
//! ```
//!
//! Compile a sequence to the bytes sent with `stream`:
//! ```bash
//! qudi-station pulse compile odmr.yaml --hex
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use prost::Message;
use qudi_station::pulse_streamer::sequence::describe;
use qudi_station::pulse_streamer::{decode_frame, encode_frame, SequenceFile, SequenceMessage};
use qudi_station::station::{self, DependencyGraph, ModuleCatalog, Validator};
use qudi_station::tracing_setup::{self, OutputFormat};
use qudi_station::{Settings, ValidationReport};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "qudi-station")]
#[command(about = "Check qudi station files and build Pulse Streamer sequences", long_about = None)]
struct Cli {
    /// Settings file (defaults to qudi-station.toml if present)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format
    #[arg(long, global = true)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one or more station files
    Validate {
        /// Station files
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        /// Catalog file or directory (repeatable, earlier wins)
        #[arg(long)]
        catalog: Vec<PathBuf>,

        /// Fail on warnings too
        #[arg(long)]
        strict: bool,

        /// Report format
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },

    /// Print the module activation order
    Order {
        /// Station file
        config: PathBuf,

        /// Only the modules needed to activate this one
        #[arg(long)]
        root: Option<String>,
    },

    /// Print the connect graph in DOT format
    Graph {
        /// Station file
        config: PathBuf,
    },

    /// Print every module that depends on MODULE
    Dependents {
        /// Station file
        config: PathBuf,

        /// Module instance name
        module: String,
    },

    /// Pulse Streamer sequences
    Pulse {
        #[command(subcommand)]
        command: PulseCommand,
    },
}

#[derive(Subcommand)]
enum PulseCommand {
    /// Compile a YAML sequence into an encoded SequenceMessage
    Compile {
        /// Sequence description
        sequence: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Write hex text instead of raw bytes
        #[arg(long)]
        hex: bool,

        /// Prefix the message with the gRPC length header
        #[arg(long)]
        framed: bool,
    },

    /// Decode an encoded SequenceMessage and print a summary
    Inspect {
        /// Encoded message
        file: PathBuf,

        /// Input is hex text
        #[arg(long)]
        hex: bool,

        /// Input carries the gRPC length header
        #[arg(long)]
        framed: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    tracing_setup::init_from_settings(&settings)?;
    debug!(?settings, "settings loaded");

    match cli.command {
        Commands::Validate {
            configs,
            catalog,
            strict,
            format,
        } => {
            let strict = strict || settings.validation.strict;
            let mut catalog_paths = catalog;
            catalog_paths.extend(settings.validation.catalog_paths.iter().cloned());
            validate(&configs, &catalog_paths, strict, format).await
        }
        Commands::Order { config, root } => order(&config, root.as_deref()).await,
        Commands::Graph { config } => {
            let station = station::load_file(&config).await?;
            print!("{}", DependencyGraph::from_station(&station).to_dot());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Dependents { config, module } => dependents(&config, &module).await,
        Commands::Pulse { command } => match command {
            PulseCommand::Compile {
                sequence,
                out,
                hex,
                framed,
            } => compile(&sequence, out.as_deref(), hex, framed).await,
            PulseCommand::Inspect { file, hex, framed } => inspect(&file, hex, framed).await,
        },
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.settings {
        Some(path) => {
            if !path.exists() {
                bail!("settings file {} does not exist", path.display());
            }
            Settings::load_from(path)?
        }
        None => Settings::load()?,
    };

    if let Some(level) = &cli.log_level {
        settings.application.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        settings.application.log_format = format.to_string();
    }
    settings.validate()?;
    Ok(settings)
}

async fn validate(
    configs: &[PathBuf],
    catalog_paths: &[PathBuf],
    strict: bool,
    format: ReportFormat,
) -> Result<ExitCode> {
    let mut catalog = ModuleCatalog::new();
    for path in catalog_paths {
        catalog.add_search_path(path);
    }
    for err in catalog.scan().await {
        warn!("{}", err);
    }

    let validator = if catalog.is_empty() {
        Validator::new()
    } else {
        Validator::new().with_catalog(&catalog)
    };

    let mut reports: Vec<ValidationReport> = Vec::new();
    let mut failed = false;
    for path in configs {
        match station::load_file(path).await {
            Ok(station) => {
                let report = validator.validate(&station);
                failed |= !report.is_clean(strict);
                info!(path = %path.display(), summary = %report.summary(), "validated");
                reports.push(report);
            }
            Err(e) => {
                failed = true;
                error!("{}: {}", path.display(), e);
            }
        }
    }

    match format {
        ReportFormat::Text => {
            for report in &reports {
                println!("{}", report);
            }
        }
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn order(config: &Path, root: Option<&str>) -> Result<ExitCode> {
    let station = station::load_file(config).await?;
    let graph = DependencyGraph::from_station(&station);
    let order = match root {
        Some(root) => {
            if !station.contains(root) {
                bail!("module '{}' is not declared in {}", root, config.display());
            }
            graph.activation_order(root)?
        }
        None => graph.load_order()?,
    };
    for name in order {
        println!("{}", name);
    }
    Ok(ExitCode::SUCCESS)
}

async fn dependents(config: &Path, module: &str) -> Result<ExitCode> {
    let station = station::load_file(config).await?;
    if !station.contains(module) {
        bail!("module '{}' is not declared in {}", module, config.display());
    }
    for name in DependencyGraph::from_station(&station).transitive_dependents(module) {
        println!("{}", name);
    }
    Ok(ExitCode::SUCCESS)
}

async fn compile(sequence: &Path, out: Option<&Path>, hex: bool, framed: bool) -> Result<ExitCode> {
    let file = SequenceFile::load(sequence)
        .await
        .with_context(|| format!("reading {}", sequence.display()))?;
    let message = file.compile()?;
    let bytes = if framed {
        encode_frame(&message)?.to_vec()
    } else {
        message.encode_to_vec()
    };
    info!(
        pulses = message.pulse.len(),
        bytes = bytes.len(),
        "sequence compiled"
    );

    let payload = if hex {
        let mut text = hex::encode(&bytes);
        text.push('\n');
        text.into_bytes()
    } else {
        bytes
    };

    match out {
        Some(path) => tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => std::io::stdout().lock().write_all(&payload)?,
    }
    Ok(ExitCode::SUCCESS)
}

async fn inspect(file: &Path, hex: bool, framed: bool) -> Result<ExitCode> {
    let raw = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let bytes = if hex {
        let text = String::from_utf8(raw).context("hex input is not text")?;
        hex::decode(text.trim()).context("hex input is malformed")?
    } else {
        raw
    };

    let message = if framed {
        decode_frame::<SequenceMessage>(&bytes)?
    } else {
        SequenceMessage::decode(bytes.as_slice())?
    };
    println!("{}", serde_json::to_string_pretty(&describe(&message))?);
    Ok(ExitCode::SUCCESS)
}
