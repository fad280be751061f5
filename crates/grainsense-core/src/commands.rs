//! Pull-based command queue.
//!
//! Devices cannot be reached directly, so commands wait here until the
//! target device polls. Each device holds at most one pending command and a
//! newer command replaces an unclaimed one. Commands that nobody claims
//! within the expiry window are dropped by maintenance.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::devices::DeviceRegistry;
use crate::error::CommandError;

/// Command name asking a device to acquire and submit a spectrum.
pub const ANALYZE_COMMAND: &str = "analyze";

/// Poll reply sent when nothing is pending.
pub const IDLE_COMMAND: &str = "status";

/// Target keyword selecting the most recently active device.
pub const AUTO_TARGET: &str = "auto";

/// A queued command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub command: String,
    /// Epoch ms when the command was queued
    pub timestamp: u64,
}

/// Who a command is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTarget {
    /// Most recently active device
    Auto,
    Device(String),
}

impl From<&str> for CommandTarget {
    fn from(s: &str) -> Self {
        if s == AUTO_TARGET {
            Self::Auto
        } else {
            Self::Device(s.to_string())
        }
    }
}

impl FromStr for CommandTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str(AUTO_TARGET),
            Self::Device(id) => f.write_str(id),
        }
    }
}

/// Pending commands keyed by device id.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: Mutex<HashMap<String, PendingCommand>>,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingCommand>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a command, replacing any unclaimed one for the device.
    pub fn enqueue(&self, device_id: &str, command: &str, now_ms: u64) {
        let replaced = self.lock().insert(
            device_id.to_string(),
            PendingCommand {
                command: command.to_string(),
                timestamp: now_ms,
            },
        );
        info!(
            device_id,
            command,
            replaced = replaced.is_some(),
            "Command queued"
        );
    }

    /// Remove and return the device's pending command.
    pub fn claim(&self, device_id: &str) -> Option<PendingCommand> {
        let claimed = self.lock().remove(device_id);
        if let Some(cmd) = &claimed {
            debug!(device_id, command = %cmd.command, "Command claimed");
        }
        claimed
    }

    /// Look at the pending command without claiming it.
    #[must_use]
    pub fn peek(&self, device_id: &str) -> Option<PendingCommand> {
        self.lock().get(device_id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop commands older than `expiry`; returns the affected device ids.
    pub fn sweep_expired(&self, now_ms: u64, expiry: Duration) -> Vec<String> {
        let limit = expiry.as_millis();
        let mut expired = Vec::new();
        self.lock().retain(|id, cmd| {
            let keep = u128::from(now_ms.saturating_sub(cmd.timestamp)) <= limit;
            if !keep {
                expired.push(id.clone());
            }
            keep
        });
        expired.sort();
        for id in &expired {
            info!(device_id = %id, "Expired command dropped");
        }
        expired
    }

    /// Pick the most recently active device.
    pub fn select_target(
        registry: &DeviceRegistry,
        now_ms: u64,
        timeout: Duration,
    ) -> Result<String, CommandError> {
        if registry.is_empty() {
            return Err(CommandError::NoDeviceKnown);
        }
        registry
            .list_active(now_ms, timeout)
            .into_iter()
            .next()
            .map(|record| record.device_id)
            .ok_or(CommandError::NoActiveDevice)
    }

    /// Resolve a target to a concrete device id.
    pub fn resolve_target(
        target: &CommandTarget,
        registry: &DeviceRegistry,
        now_ms: u64,
        timeout: Duration,
    ) -> Result<String, CommandError> {
        match target {
            CommandTarget::Auto => Self::select_target(registry, now_ms, timeout),
            CommandTarget::Device(id) => Ok(id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);
    const EXPIRY: Duration = Duration::from_secs(60);

    #[test]
    fn second_enqueue_replaces_first() {
        let queue = CommandQueue::new();
        queue.enqueue("esp32-a", "calibrate", 1_000);
        queue.enqueue("esp32-a", ANALYZE_COMMAND, 2_000);

        assert_eq!(queue.len(), 1);
        let cmd = queue.claim("esp32-a").unwrap();
        assert_eq!(cmd.command, ANALYZE_COMMAND);
        assert_eq!(cmd.timestamp, 2_000);
    }

    #[test]
    fn claim_is_remove_and_return() {
        let queue = CommandQueue::new();
        assert!(queue.claim("esp32-a").is_none());

        queue.enqueue("esp32-a", ANALYZE_COMMAND, 0);
        assert!(queue.peek("esp32-a").is_some());
        assert!(queue.claim("esp32-a").is_some());
        assert!(queue.claim("esp32-a").is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn sweep_drops_commands_past_expiry() {
        let queue = CommandQueue::new();
        queue.enqueue("old", ANALYZE_COMMAND, 0);
        queue.enqueue("fresh", ANALYZE_COMMAND, 30_000);

        assert!(queue.sweep_expired(60_000, EXPIRY).is_empty());
        assert_eq!(queue.sweep_expired(61_000, EXPIRY), ["old"]);
        assert!(queue.claim("old").is_none());
        assert!(queue.claim("fresh").is_some());
    }

    #[test]
    fn select_target_distinguishes_empty_and_inactive() {
        let registry = DeviceRegistry::new();
        assert_eq!(
            CommandQueue::select_target(&registry, 0, TIMEOUT),
            Err(CommandError::NoDeviceKnown)
        );

        registry.record_contact("esp32-a", "10.0.0.5", "idle", 0);
        assert_eq!(
            CommandQueue::select_target(&registry, 30_000, TIMEOUT),
            Err(CommandError::NoActiveDevice)
        );
    }

    #[test]
    fn select_target_prefers_most_recent_contact() {
        let registry = DeviceRegistry::new();
        registry.record_contact("esp32-a", "a", "idle", 1_000);
        registry.record_contact("esp32-b", "b", "idle", 4_000);
        assert_eq!(
            CommandQueue::select_target(&registry, 5_000, TIMEOUT).unwrap(),
            "esp32-b"
        );
    }

    #[test]
    fn targets_parse_auto_keyword() {
        assert_eq!("auto".parse::<CommandTarget>().unwrap(), CommandTarget::Auto);
        assert_eq!(
            "esp32-a".parse::<CommandTarget>().unwrap(),
            CommandTarget::Device("esp32-a".to_string())
        );
        assert_eq!(CommandTarget::Auto.to_string(), "auto");

        let registry = DeviceRegistry::new();
        let explicit = CommandTarget::Device("offline".to_string());
        assert_eq!(
            CommandQueue::resolve_target(&explicit, &registry, 0, TIMEOUT).unwrap(),
            "offline"
        );
    }
}
