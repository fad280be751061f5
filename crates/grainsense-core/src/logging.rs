//! Process-wide `tracing` setup.
//!
//! Events go to stderr, pretty or as JSON lines, and are optionally mirrored
//! to an append-only log file. `RUST_LOG` takes precedence over the
//! configured level, e.g. `RUST_LOG=grainsense_core::inference=debug`.
//!
//! Events across the crate share these field names:
//! - `device_id`: spectrometer identifier
//! - `address`: address the device polled from
//! - `species`: predicted species label
//! - `command`: queued command name
//! - `status`: final verdict (`NORMAL` / `ANORMAL`)

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{GeneralConfig, LogFormat};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Where and how events are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Mirror events to this file (appended, parent dirs created)
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from(&GeneralConfig::default())
    }
}

impl From<&GeneralConfig> for LogConfig {
    fn from(general: &GeneralConfig) -> Self {
        Self {
            level: general.log_level.clone(),
            format: general.log_format,
            file: general.log_file.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level '{0}' (expected trace, debug, info, warn or error)")]
    InvalidLevel(String),

    #[error("cannot open log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("cannot install subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_ansi(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(io::stderr)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, file: File) -> BoxedLayer {
    let writer = Mutex::new(file);
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(writer)
            .with_target(true)
            .flatten_event(true)
            .boxed(),
    }
}

/// Install the global subscriber. Only the first successful call takes
/// effect; later calls fail with [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if INSTALLED.load(Ordering::Acquire) {
        return Err(LogError::AlreadyInitialized);
    }

    config
        .level
        .parse::<Level>()
        .map_err(|_| LogError::InvalidLevel(config.level.clone()))?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers = vec![stderr_layer(config.format)];
    if let Some(path) = &config.file {
        layers.push(file_layer(config.format, open_log_file(path)?));
    }
    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(layers).with(env_filter),
    )?;
    INSTALLED.store(true, Ordering::Release);

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_follows_general_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());

        let from_json: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(from_json.level, "info");
    }

    #[test]
    fn log_config_from_general_config() {
        let general = GeneralConfig {
            log_level: "debug".to_string(),
            log_format: LogFormat::Json,
            log_file: Some(PathBuf::from("/tmp/gs.log")),
        };
        let config = LogConfig::from(&general);
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/gs.log")));
    }

    #[test]
    fn unknown_level_is_rejected_before_install() {
        let config = LogConfig {
            level: "loud".to_string(),
            ..LogConfig::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, LogError::InvalidLevel(ref l) if l == "loud"));
        assert!(err.to_string().contains("expected trace"));
    }

    #[test]
    fn json_file_layer_writes_correlation_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("grainsense.log");
        let file = open_log_file(&path).unwrap();

        let subscriber = tracing_subscriber::registry().with(file_layer(LogFormat::Json, file));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(device_id = "esp32-a", violations = 2u64, "verdict");
        });

        let text = std::fs::read_to_string(&path).unwrap();
        let line = text.lines().find(|l| !l.trim().is_empty()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(parsed.get("timestamp").is_some());
        assert_eq!(parsed["device_id"], "esp32-a");
        assert_eq!(parsed["violations"], 2);
        assert_eq!(parsed["message"], "verdict");
    }

    #[test]
    fn pretty_file_layer_has_no_ansi_codes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grainsense.log");
        let file = open_log_file(&path).unwrap();

        let subscriber =
            tracing_subscriber::registry().with(file_layer(LogFormat::Pretty, file));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(species = "soja", "low confidence");
        });

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("low confidence"));
        assert!(text.contains("species=\"soja\""));
        assert!(!text.contains('\u{1b}'));
    }
}
