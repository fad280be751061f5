//! Configuration management for grainsense
//!
//! Handles loading and validation of `grainsense.toml` configuration files.
//! Every field has a default, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub devices: DevicesConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub inference: InferenceConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file, written in addition to stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Model bundle location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Path of the trained bundle (JSON)
    #[serde(default = "default_bundle_path")]
    pub bundle_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            bundle_path: default_bundle_path(),
        }
    }
}

fn default_bundle_path() -> PathBuf {
    PathBuf::from("grainsense-model.json")
}

/// Device liveness configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DevicesConfig {
    /// A device is active if it polled within this many seconds
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_secs: u64,

    /// Devices silent for longer than this are dropped by maintenance
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_secs: default_liveness_timeout(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl DevicesConfig {
    #[must_use]
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

fn default_liveness_timeout() -> u64 {
    10
}

fn default_stale_after() -> u64 {
    300
}

/// Pending command configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandsConfig {
    /// Unclaimed commands older than this are dropped
    #[serde(default = "default_command_expiry")]
    pub expiry_secs: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_command_expiry(),
        }
    }
}

impl CommandsConfig {
    #[must_use]
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

fn default_command_expiry() -> u64 {
    60
}

/// Background maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceConfig {
    /// Sweep interval in seconds (0 disables the task)
    #[serde(default = "default_maintenance_interval")]
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_maintenance_interval(),
        }
    }
}

fn default_maintenance_interval() -> u64 {
    60
}

/// Analysis history configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryConfig {
    /// Maximum results kept in memory
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

fn default_history_capacity() -> usize {
    100
}

/// Decision-rule parameters of the inference pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceConfig {
    /// Leading PCA components kept from the band projection
    #[serde(default = "default_pca_components")]
    pub pca_components: usize,

    /// Index violations needed for the MAD rule to flag a sample
    #[serde(default = "default_mad_min_violations")]
    pub mad_min_violations: usize,

    /// Confidence (0-1) under which a NORMAL verdict is overridden
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            pca_components: default_pca_components(),
            mad_min_violations: default_mad_min_violations(),
            low_confidence_threshold: default_low_confidence_threshold(),
        }
    }
}

fn default_pca_components() -> usize {
    6
}

fn default_mad_min_violations() -> usize {
    2
}

fn default_low_confidence_threshold() -> f64 {
    0.60
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.devices.liveness_timeout_secs == 0 {
            return invalid("devices.liveness_timeout_secs must be > 0".to_string());
        }
        if self.devices.stale_after_secs < self.devices.liveness_timeout_secs {
            return invalid(format!(
                "devices.stale_after_secs ({}) must be >= liveness_timeout_secs ({})",
                self.devices.stale_after_secs, self.devices.liveness_timeout_secs
            ));
        }
        if self.commands.expiry_secs == 0 {
            return invalid("commands.expiry_secs must be > 0".to_string());
        }
        if self.history.capacity == 0 {
            return invalid("history.capacity must be > 0".to_string());
        }
        if !(1..=crate::spectrum::TRIMMED_BAND_COUNT).contains(&self.inference.pca_components) {
            return invalid(format!(
                "inference.pca_components must be in 1..={}, got {}",
                crate::spectrum::TRIMMED_BAND_COUNT,
                self.inference.pca_components
            ));
        }
        if !(1..=crate::spectrum::INDEX_COUNT).contains(&self.inference.mad_min_violations) {
            return invalid(format!(
                "inference.mad_min_violations must be in 1..={}, got {}",
                crate::spectrum::INDEX_COUNT,
                self.inference.mad_min_violations
            ));
        }
        let threshold = self.inference.low_confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return invalid(format!(
                "inference.low_confidence_threshold must be in (0, 1], got {threshold}"
            ));
        }
        Ok(())
    }
}
