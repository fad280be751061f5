//! grainsense-core: Core library for grainsense
//!
//! Classifies grain samples from an 18-band reflectance spectrum and flags
//! anomalous (possibly mixed or contaminated) samples. Also coordinates the
//! spectrometers that produce the spectra through a pull-based command queue.
//!
//! # Architecture
//!
//! ```text
//! device poll ──► Coordinator ──► DeviceRegistry / CommandQueue
//!                     │
//! spectrum ─────► InferenceEngine ──► AnalysisLog ──► export
//!                     │
//!                 ModelBundle (loaded once, read-only)
//!
//! maintenance task ──► sweep stale devices + expired commands
//! ```
//!
//! # Modules
//!
//! - `spectrum`: band validation, 485 nm removal, spectral indices
//! - `model`: trained bundle (scalers, PCA, classifier, detectors)
//! - `inference`: pipeline and verdict rule
//! - `devices`: device liveness registry
//! - `commands`: pending command queue and target selection
//! - `history`: bounded analysis history
//! - `maintenance`: periodic sweep task
//! - `coordinator`: request-level facade
//! - `export`: CSV / JSON lines history export
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod devices;
pub mod error;
pub mod export;
pub mod history;
pub mod inference;
pub mod logging;
pub mod maintenance;
pub mod model;
pub mod spectrum;

pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use inference::{AnalysisResult, InferenceEngine, Status};
pub use model::ModelBundle;
pub use spectrum::RawSpectrum;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
