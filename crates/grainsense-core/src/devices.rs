//! Registry of spectrometers that have polled the server.
//!
//! Devices are identified by the id they report. Each poll refreshes the
//! record; a device counts as active while its last contact is younger than
//! the liveness timeout. All timestamps are epoch milliseconds supplied by
//! the caller.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Snapshot of one known device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    /// Address the last poll came from
    pub address: String,
    pub last_contact_ms: u64,
    /// Status string reported by the device itself
    pub status: String,
    /// Contacted within the liveness timeout
    pub active: bool,
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    address: String,
    last_contact_ms: u64,
    status: String,
}

fn age_ms(now_ms: u64, last_ms: u64) -> u128 {
    u128::from(now_ms.saturating_sub(last_ms))
}

/// Thread-safe device table.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceEntry>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DeviceEntry>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or refresh a device.
    pub fn record_contact(&self, device_id: &str, address: &str, status: &str, now_ms: u64) {
        let previous = self.lock().insert(
            device_id.to_string(),
            DeviceEntry {
                address: address.to_string(),
                last_contact_ms: now_ms,
                status: status.to_string(),
            },
        );
        if previous.is_none() {
            info!(device_id, address, "New device registered");
        } else {
            debug!(device_id, address, status, "Device contact");
        }
    }

    /// Whether the device polled within `timeout`. Unknown ids are inactive.
    #[must_use]
    pub fn is_active(&self, device_id: &str, now_ms: u64, timeout: Duration) -> bool {
        self.lock()
            .get(device_id)
            .is_some_and(|entry| age_ms(now_ms, entry.last_contact_ms) < timeout.as_millis())
    }

    /// All known devices, most recent contact first.
    #[must_use]
    pub fn list(&self, now_ms: u64, timeout: Duration) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self
            .lock()
            .iter()
            .map(|(id, entry)| DeviceRecord {
                device_id: id.clone(),
                address: entry.address.clone(),
                last_contact_ms: entry.last_contact_ms,
                status: entry.status.clone(),
                active: age_ms(now_ms, entry.last_contact_ms) < timeout.as_millis(),
            })
            .collect();
        records.sort_by(|a, b| {
            b.last_contact_ms
                .cmp(&a.last_contact_ms)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        records
    }

    /// Active devices, most recent contact first.
    #[must_use]
    pub fn list_active(&self, now_ms: u64, timeout: Duration) -> Vec<DeviceRecord> {
        self.list(now_ms, timeout)
            .into_iter()
            .filter(|record| record.active)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop devices silent for longer than `stale_after`; returns their ids.
    pub fn sweep_stale(&self, now_ms: u64, stale_after: Duration) -> Vec<String> {
        let limit = stale_after.as_millis();
        let mut removed = Vec::new();
        self.lock().retain(|id, entry| {
            let keep = age_ms(now_ms, entry.last_contact_ms) <= limit;
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        removed.sort();
        for id in &removed {
            info!(device_id = %id, "Stale device removed");
        }
        removed
    }
}
