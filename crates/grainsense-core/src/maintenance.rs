//! Periodic cleanup of stale devices and expired commands.
//!
//! A single background task sweeps both tables on a fixed interval and
//! stops as soon as its handle signals shutdown.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::commands::CommandQueue;
use crate::config::Config;
use crate::devices::DeviceRegistry;

/// What one sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub timestamp_ms: u64,
    pub stale_devices: Vec<String>,
    pub expired_commands: Vec<String>,
}

impl SweepReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stale_devices.is_empty() && self.expired_commands.is_empty()
    }
}

/// Sweep intervals and ages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSettings {
    /// Zero disables the task
    pub interval: Duration,
    pub stale_after: Duration,
    pub command_expiry: Duration,
}

impl From<&Config> for MaintenanceSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.maintenance.interval_secs),
            stale_after: config.devices.stale_after(),
            command_expiry: config.commands.expiry(),
        }
    }
}

/// Run one sweep over both tables.
pub fn sweep(
    registry: &DeviceRegistry,
    queue: &CommandQueue,
    now_ms: u64,
    settings: &MaintenanceSettings,
) -> SweepReport {
    SweepReport {
        timestamp_ms: now_ms,
        stale_devices: registry.sweep_stale(now_ms, settings.stale_after),
        expired_commands: queue.sweep_expired(now_ms, settings.command_expiry),
    }
}

/// Handle returned by [`spawn_maintenance`].
#[derive(Debug)]
pub struct MaintenanceHandle {
    task: JoinHandle<u64>,
    shutdown: watch::Sender<bool>,
}

impl MaintenanceHandle {
    /// Ask the task to stop without waiting.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the task and wait for it; returns the number of sweeps run.
    pub async fn shutdown(self) -> u64 {
        self.signal_shutdown();
        match self.task.await {
            Ok(sweeps) => sweeps,
            Err(err) => {
                warn!(error = %err, "Maintenance task ended abnormally");
                0
            }
        }
    }
}

/// Spawn the periodic sweep task on the current tokio runtime.
#[must_use]
pub fn spawn_maintenance(
    registry: Arc<DeviceRegistry>,
    queue: Arc<CommandQueue>,
    settings: MaintenanceSettings,
) -> MaintenanceHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        if settings.interval.is_zero() {
            info!("Maintenance disabled (interval_secs = 0)");
            return 0;
        }
        info!(
            interval_secs = settings.interval.as_secs(),
            stale_after_secs = settings.stale_after.as_secs(),
            command_expiry_secs = settings.command_expiry.as_secs(),
            "Maintenance task started"
        );

        let mut ticker = tokio::time::interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; sweep one interval after start.
        ticker.tick().await;

        let mut sweeps = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = sweep(&registry, &queue, epoch_ms(), &settings);
                    sweeps += 1;
                    if report.is_empty() {
                        debug!(sweeps, "Maintenance sweep: nothing to remove");
                    } else {
                        info!(
                            stale_devices = report.stale_devices.len(),
                            expired_commands = report.expired_commands.len(),
                            "Maintenance sweep"
                        );
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(sweeps, "Maintenance task shutting down");
                        break;
                    }
                }
            }
        }
        sweeps
    });

    MaintenanceHandle { task, shutdown }
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}
