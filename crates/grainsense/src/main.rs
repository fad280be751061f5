//! grainsense CLI
//!
//! Offline front end over grainsense-core: validate a model bundle, classify
//! spectra from files and export the resulting history.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use grainsense_core::config::{Config, LogFormat};
use grainsense_core::coordinator::SpectrumSubmission;
use grainsense_core::error::format_error_with_remediation;
use grainsense_core::export::ExportFormat;
use grainsense_core::logging::{LogConfig, init_logging};
use grainsense_core::maintenance::epoch_ms;
use grainsense_core::{Coordinator, InferenceEngine, ModelBundle, RawSpectrum};

#[derive(Parser, Debug)]
#[command(
    name = "grainsense",
    version,
    about = "Spectral grain classification and anomaly detection"
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "GRAINSENSE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate a model bundle, then print its summary
    CheckBundle {
        /// Bundle path (defaults to model.bundle_path from config)
        #[arg(long)]
        bundle: Option<PathBuf>,
    },

    /// Classify the spectra in a file and print one JSON result per spectrum
    Classify {
        #[arg(long)]
        bundle: Option<PathBuf>,

        /// Device id recorded on each result
        #[arg(long, default_value = "cli")]
        device: String,

        /// JSON array of 18 readings, or one such array per line
        file: PathBuf,
    },

    /// Classify a batch of spectra and print the history export
    Export {
        #[arg(long)]
        bundle: Option<PathBuf>,

        /// csv or jsonl
        #[arg(long, default_value = "csv")]
        format: ExportFormat,

        #[arg(long, default_value = "cli")]
        device: String,

        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<grainsense_core::Error>() {
                Some(core) => eprintln!("{}", format_error_with_remediation(core)),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())
        .map_err(grainsense_core::Error::from)?;

    let mut log_config = LogConfig::from(&config.general);
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(&log_config).context("failed to initialize logging")?;
    debug!(config = ?cli.config, "Configuration loaded");

    match cli.command {
        Commands::CheckBundle { bundle } => check_bundle(&config, bundle.as_deref()),
        Commands::Classify {
            bundle,
            device,
            file,
        } => classify(&config, bundle.as_deref(), &device, &file),
        Commands::Export {
            bundle,
            format,
            device,
            file,
        } => export(config, bundle.as_deref(), format, &device, &file),
        Commands::Config => {
            let text = config
                .to_toml_string()
                .map_err(grainsense_core::Error::from)?;
            print!("{text}");
            Ok(())
        }
    }
}

fn load_bundle(config: &Config, bundle: Option<&Path>) -> anyhow::Result<ModelBundle> {
    let path = bundle.unwrap_or(config.model.bundle_path.as_path());
    Ok(ModelBundle::load(path, config.inference.pca_components)?)
}

fn check_bundle(config: &Config, bundle: Option<&Path>) -> anyhow::Result<()> {
    let bundle = load_bundle(config, bundle)?;
    println!("{}", serde_json::to_string_pretty(&bundle.summary())?);
    Ok(())
}

/// Read spectra from a file holding a single JSON array or JSON lines.
fn read_spectra(path: &Path) -> anyhow::Result<Vec<RawSpectrum>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    if let Ok(single) = serde_json::from_str::<RawSpectrum>(&text) {
        return Ok(vec![single]);
    }

    let mut spectra = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let spectrum = serde_json::from_str::<RawSpectrum>(line).with_context(|| {
            format!("{}:{}: not a JSON array of readings", path.display(), n + 1)
        })?;
        spectra.push(spectrum);
    }
    if spectra.is_empty() {
        bail!("{} contains no spectra", path.display());
    }
    Ok(spectra)
}

fn classify(
    config: &Config,
    bundle: Option<&Path>,
    device: &str,
    file: &Path,
) -> anyhow::Result<()> {
    let engine = InferenceEngine::new(Arc::new(load_bundle(config, bundle)?), &config.inference);
    let spectra = read_spectra(file)?;
    info!(count = spectra.len(), "Classifying spectra");

    for spectrum in &spectra {
        let result = engine.classify(device, spectrum)?;
        println!("{}", serde_json::to_string(&result)?);
    }
    Ok(())
}

fn export(
    config: Config,
    bundle: Option<&Path>,
    format: ExportFormat,
    device: &str,
    file: &Path,
) -> anyhow::Result<()> {
    let engine = InferenceEngine::new(Arc::new(load_bundle(&config, bundle)?), &config.inference);
    let spectra = read_spectra(file)?;
    let coordinator = Coordinator::new(config, Some(engine));

    for spectrum in spectra {
        let submission = SpectrumSubmission {
            device_id: Some(device.to_string()),
            spectrum,
        };
        coordinator.submit_spectrum(&submission, epoch_ms())?;
    }

    print!("{}", coordinator.export(format)?);
    Ok(())
}
