//! Error types for grainsense-core

use std::fmt::Write;
use std::path::PathBuf;

use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for grainsense-core
#[derive(Error, Debug)]
pub enum Error {
    /// Spectrum validation and preprocessing errors
    #[error("Spectrum error: {0}")]
    Spectrum(#[from] SpectrumError),

    /// Model bundle errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Command targeting errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (background task failures, formatting, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Spectrum(err) => Some(err.remediation()),
            Self::Model(err) => Some(err.remediation()),
            Self::Command(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(Remediation::new(
                "Verify the bundle, config and spectra paths are readable.",
            )),
            Self::Json(_) => Some(
                Remediation::new("Send the spectrum as a JSON array of numbers.")
                    .alternative("Check the payload for truncation or non-numeric readings."),
            ),
            Self::Runtime(_) => None,
        }
    }

    /// Whether the failure is scoped to a single request.
    ///
    /// Request-scoped failures are rejected and reported back to the caller;
    /// everything else points at a configuration or deployment problem.
    #[must_use]
    pub fn is_request_error(&self) -> bool {
        match self {
            Self::Spectrum(err) => !matches!(err, SpectrumError::MissingBand(_)),
            Self::Command(_) | Self::Json(_) => true,
            Self::Model(ModelError::Unavailable) => true,
            _ => false,
        }
    }
}

/// Spectrum validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpectrumError {
    /// Wrong number of readings for the stage that received them
    #[error("Invalid spectrum length: expected {expected} bands, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// A reading was NaN or infinite
    #[error("Non-finite reading at band index {index}")]
    NonFiniteReading { index: usize },

    /// A band required by an index formula is absent from the column list
    #[error("Required band missing from band columns: {0}")]
    MissingBand(String),
}

impl SpectrumError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InvalidLength { expected, .. } => Remediation::new(format!(
                "Resend the sample with exactly {expected} readings in wavelength order."
            ))
            .alternative("Check the device firmware band list (410 nm through 940 nm)."),
            Self::NonFiniteReading { index } => Remediation::new(format!(
                "Reading {index} is not a finite number. Re-run the acquisition."
            ))
            .alternative("Check the sensor for saturation or a failed integration cycle."),
            Self::MissingBand(band) => Remediation::new(format!(
                "The model bundle does not provide band `{band}`. Re-export the bundle."
            ))
            .command("Validate bundle", "grainsense check-bundle --bundle <path>")
            .alternative("Make sure the training export uses the 17-band layout without r485."),
        }
    }
}

/// Model bundle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No bundle was loaded at startup
    #[error("Model unavailable: no bundle loaded")]
    Unavailable,

    #[error("Unsupported bundle format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Dimension mismatch in {component}: expected {expected}, got {actual}")]
    DimensionMismatch {
        component: String,
        expected: usize,
        actual: usize,
    },

    #[error("No anomaly detector for species: {0}")]
    MissingDetector(String),

    #[error("No MAD thresholds for species: {0}")]
    MissingThresholds(String),

    #[error("Invalid model parameter: {0}")]
    InvalidParameter(String),

    #[error("Column mismatch: {0}")]
    ColumnMismatch(String),

    #[error("Failed to load bundle: {0}")]
    Load(String),
}

impl ModelError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Unavailable => Remediation::new(
                "Place a valid model bundle at the configured path and restart.",
            )
            .command("Show config", "grainsense config")
            .alternative("Device polling keeps working while the model is unavailable."),
            Self::UnsupportedVersion { supported, .. } => Remediation::new(format!(
                "Re-export the bundle using format version {supported}."
            ))
            .alternative("Upgrade grainsense if the bundle was produced by a newer exporter."),
            Self::DimensionMismatch { .. }
            | Self::MissingDetector(_)
            | Self::MissingThresholds(_)
            | Self::InvalidParameter(_)
            | Self::ColumnMismatch(_) => {
                Remediation::new("The model bundle is inconsistent. Re-export it from training.")
                    .command("Validate bundle", "grainsense check-bundle --bundle <path>")
            }
            Self::Load(_) => {
                Remediation::new("Check that the bundle file exists and is valid JSON.")
                    .command("Validate bundle", "grainsense check-bundle --bundle <path>")
            }
        }
    }
}

/// Command targeting errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The registry has never seen a device
    #[error("No device has contacted the server")]
    NoDeviceKnown,

    /// Devices are known but none polled within the liveness timeout
    #[error("No active device")]
    NoActiveDevice,
}

impl CommandError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::NoDeviceKnown => Remediation::new(
                "Power on the spectrometer and check that it polls this server.",
            )
            .alternative("Verify the device is configured with the server address."),
            Self::NoActiveDevice => Remediation::new(
                "No device polled recently. Wait for the next poll or restart the device.",
            )
            .alternative("Name the device explicitly instead of using `auto`."),
        }
    }
}

/// Config file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Cannot read config file {}: {reason}", path.display())]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Invalid TOML in config: {0}")]
    ParseFailed(String),

    #[error("Cannot render config as TOML: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        let show_defaults = ("Show defaults", "grainsense config");
        match self {
            Self::FileNotFound { path } => {
                Remediation::new(format!("No file at {}.", path.display()))
                    .alternative("Pass --config with an existing TOML file.")
                    .alternative("Unset GRAINSENSE_CONFIG to run with built-in defaults.")
            }
            Self::ReadFailed { path, .. } => Remediation::new(format!(
                "{} exists but could not be read.",
                path.display()
            ))
            .alternative("Check the file permissions of the config and its directory."),
            Self::ParseFailed(_) => Remediation::new("Correct the TOML syntax of the config.")
                .command(show_defaults.0, show_defaults.1),
            Self::SerializeFailed(_) => {
                Remediation::new("A config value cannot be represented in TOML.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Bring the reported field back into its allowed range.")
                    .command(show_defaults.0, show_defaults.1)
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
