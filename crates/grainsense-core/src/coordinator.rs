//! Request-level facade over the device tables, the engine and the history.
//!
//! Each method corresponds to one call a transport would make on behalf of
//! a device or an operator. The coordinator owns no transport; callers pass
//! the request payload, the peer address and the current time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::commands::{ANALYZE_COMMAND, CommandQueue, CommandTarget, IDLE_COMMAND};
use crate::config::Config;
use crate::devices::{DeviceRecord, DeviceRegistry};
use crate::error::{ModelError, Result};
use crate::export::{self, ExportFormat};
use crate::history::{AnalysisLog, LogStats};
use crate::inference::{AnalysisResult, DecisionRule, InferenceEngine};
use crate::maintenance::{self, MaintenanceHandle, MaintenanceSettings, SweepReport};
use crate::model::ModelBundle;
use crate::spectrum::{
    RAW_BAND_COUNT, RAW_BAND_NAMES, REMOVED_BAND_INDEX, RawSpectrum, TRIMMED_BAND_COUNT,
};

/// Device id used when a request does not name one.
pub const UNKNOWN_DEVICE: &str = "unknown";

/// Body of a device poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Reply to a poll: a claimed command, or `status` when idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReply {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl PollReply {
    #[must_use]
    pub fn idle() -> Self {
        Self {
            command: IDLE_COMMAND.to_string(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.command == IDLE_COMMAND && self.timestamp.is_none()
    }
}

/// Spectrum uploaded by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSubmission {
    #[serde(default)]
    pub device_id: Option<String>,
    pub spectrum: RawSpectrum,
}

/// Confirmation that a command was queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    pub status: String,
    pub device_id: String,
    pub command: String,
}

/// Anomaly rule settings as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSettings {
    pub logic: String,
    pub mad_min_violations: usize,
    /// Percent
    pub low_confidence_threshold: f64,
}

impl From<DecisionRule> for RuleSettings {
    fn from(rule: DecisionRule) -> Self {
        Self {
            logic: rule.label(),
            mad_min_violations: rule.mad_min_violations,
            low_confidence_threshold: rule.low_confidence_threshold * 100.0,
        }
    }
}

/// Health summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub online: bool,
    pub model_loaded: bool,
    pub species: Vec<String>,
    pub active_devices: usize,
    pub known_devices: usize,
    pub pending_commands: usize,
    /// Bands consumed by the model (0 when unavailable)
    pub model_bands: usize,
    pub device_bands: usize,
    pub index_columns: Vec<String>,
    pub anomaly_rule: RuleSettings,
    pub history: LogStats,
    pub timestamp_ms: u64,
}

/// PCA settings as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaReport {
    pub components: usize,
    /// Sum of explained variance ratios (0 when unknown)
    pub explained_variance: f64,
}

/// Model configuration summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfigReport {
    pub species: Vec<String>,
    pub band_columns: Vec<String>,
    pub index_columns: Vec<String>,
    pub anomaly_rule: RuleSettings,
    pub pca: PcaReport,
    pub removed_band: String,
    pub device_bands: usize,
    pub model_bands: usize,
}

fn timestamp_from_ms(now_ms: u64) -> DateTime<Utc> {
    i64::try_from(now_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// Shared state of a running server.
#[derive(Debug)]
pub struct Coordinator {
    config: Config,
    registry: Arc<DeviceRegistry>,
    queue: Arc<CommandQueue>,
    log: Arc<AnalysisLog>,
    engine: Option<InferenceEngine>,
}

impl Coordinator {
    /// Assemble a coordinator with fresh tables.
    #[must_use]
    pub fn new(config: Config, engine: Option<InferenceEngine>) -> Self {
        let log = Arc::new(AnalysisLog::new(config.history.capacity));
        Self {
            config,
            registry: Arc::new(DeviceRegistry::new()),
            queue: Arc::new(CommandQueue::new()),
            log,
            engine,
        }
    }

    /// Load the configured bundle; run without a model if that fails.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let engine = match ModelBundle::load(
            &config.model.bundle_path,
            config.inference.pca_components,
        ) {
            Ok(bundle) => Some(InferenceEngine::new(Arc::new(bundle), &config.inference)),
            Err(err) => {
                error!(
                    path = %config.model.bundle_path.display(),
                    error = %err,
                    "Model bundle failed to load; inference unavailable"
                );
                None
            }
        };
        Self::new(config, engine)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    #[must_use]
    pub fn log(&self) -> &Arc<AnalysisLog> {
        &self.log
    }

    #[must_use]
    pub fn engine(&self) -> Option<&InferenceEngine> {
        self.engine.as_ref()
    }

    fn rule(&self) -> DecisionRule {
        self.engine
            .as_ref()
            .map_or_else(|| DecisionRule::from(&self.config.inference), InferenceEngine::rule)
    }

    /// Record the device's contact and hand it its pending command.
    pub fn poll(&self, request: &PollRequest, address: &str, now_ms: u64) -> PollReply {
        let device_id = request.device_id.as_deref().unwrap_or(UNKNOWN_DEVICE);
        let status = request.status.as_deref().unwrap_or("unknown");
        self.registry.record_contact(device_id, address, status, now_ms);

        match self.queue.claim(device_id) {
            Some(cmd) => {
                info!(device_id, command = %cmd.command, "Sending command to device");
                PollReply {
                    command: cmd.command,
                    timestamp: Some(cmd.timestamp),
                }
            }
            None => PollReply::idle(),
        }
    }

    /// Classify an uploaded spectrum and store the result.
    pub fn submit_spectrum(
        &self,
        submission: &SpectrumSubmission,
        now_ms: u64,
    ) -> Result<AnalysisResult> {
        let device_id = submission.device_id.as_deref().unwrap_or(UNKNOWN_DEVICE);
        info!(device_id, bands = submission.spectrum.len(), "Spectrum received");

        let engine = self.engine.as_ref().ok_or(ModelError::Unavailable)?;
        let result = engine
            .classify_at(device_id, &submission.spectrum, timestamp_from_ms(now_ms))
            .inspect_err(|err| warn!(device_id, error = %err, "Spectrum rejected"))?;
        self.log.append(result.clone());
        Ok(result)
    }

    /// Queue an `analyze` command for a device, or for the most recently
    /// active one when the target is `auto`.
    pub fn request_analysis(&self, target: &str, now_ms: u64) -> Result<CommandAck> {
        let target = CommandTarget::from(target);
        let device_id = CommandQueue::resolve_target(
            &target,
            &self.registry,
            now_ms,
            self.config.devices.liveness_timeout(),
        )
        .inspect_err(|err| warn!(target = %target, error = %err, "No target for analysis"))?;

        self.queue.enqueue(&device_id, ANALYZE_COMMAND, now_ms);
        Ok(CommandAck {
            status: "command_queued".to_string(),
            device_id,
            command: ANALYZE_COMMAND.to_string(),
        })
    }

    /// Known devices, most recent first.
    #[must_use]
    pub fn devices(&self, now_ms: u64) -> Vec<DeviceRecord> {
        self.registry.list(now_ms, self.config.devices.liveness_timeout())
    }

    #[must_use]
    pub fn last_analysis(&self) -> Option<AnalysisResult> {
        self.log.latest()
    }

    /// Stored results, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<AnalysisResult> {
        self.log.snapshot()
    }

    #[must_use]
    pub fn status(&self, now_ms: u64) -> SystemStatus {
        let bundle = self.engine.as_ref().map(InferenceEngine::bundle);
        SystemStatus {
            online: true,
            model_loaded: bundle.is_some(),
            species: bundle.map(|b| b.species().to_vec()).unwrap_or_default(),
            active_devices: self
                .registry
                .list_active(now_ms, self.config.devices.liveness_timeout())
                .len(),
            known_devices: self.registry.len(),
            pending_commands: self.queue.len(),
            model_bands: bundle.map_or(0, |b| b.band_columns().len()),
            device_bands: RAW_BAND_COUNT,
            index_columns: bundle.map(|b| b.index_columns().to_vec()).unwrap_or_default(),
            anomaly_rule: self.rule().into(),
            history: self.log.stats(),
            timestamp_ms: now_ms,
        }
    }

    #[must_use]
    pub fn model_config(&self) -> ModelConfigReport {
        let summary = self.engine.as_ref().map(|e| e.bundle().summary());
        ModelConfigReport {
            species: summary.as_ref().map(|s| s.species.clone()).unwrap_or_default(),
            band_columns: summary
                .as_ref()
                .map(|s| s.band_columns.clone())
                .unwrap_or_default(),
            index_columns: summary
                .as_ref()
                .map(|s| s.index_columns.clone())
                .unwrap_or_default(),
            anomaly_rule: self.rule().into(),
            pca: PcaReport {
                components: summary
                    .as_ref()
                    .map_or(self.config.inference.pca_components, |s| {
                        s.retained_components
                    }),
                explained_variance: summary
                    .as_ref()
                    .and_then(|s| s.explained_variance)
                    .unwrap_or(0.0),
            },
            removed_band: RAW_BAND_NAMES[REMOVED_BAND_INDEX].to_string(),
            device_bands: RAW_BAND_COUNT,
            model_bands: TRIMMED_BAND_COUNT,
        }
    }

    /// Render the history, oldest first.
    pub fn export(&self, format: ExportFormat) -> Result<String> {
        export::render(&self.log.chronological(), format)
    }

    /// Drop stale devices and expired commands.
    pub fn maintenance_sweep(&self, now_ms: u64) -> SweepReport {
        maintenance::sweep(
            &self.registry,
            &self.queue,
            now_ms,
            &MaintenanceSettings::from(&self.config),
        )
    }

    /// Start the background sweep task for this coordinator's tables.
    #[must_use]
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        maintenance::spawn_maintenance(
            Arc::clone(&self.registry),
            Arc::clone(&self.queue),
            MaintenanceSettings::from(&self.config),
        )
    }
}
