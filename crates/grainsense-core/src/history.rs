//! Bounded in-memory history of analysis results.
//!
//! Keeps the most recent results in insertion order and evicts the oldest
//! once full. The buffer, the latest-result pointer and the counters share a
//! single lock so readers never observe a half-applied append.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::inference::AnalysisResult;

/// Default number of results kept.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug)]
struct LogState {
    entries: VecDeque<AnalysisResult>,
    total_appended: u64,
    total_evicted: u64,
}

/// Counters describing the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub len: usize,
    pub capacity: usize,
    pub total_appended: u64,
    pub total_evicted: u64,
}

/// Thread-safe bounded result log.
#[derive(Debug)]
pub struct AnalysisLog {
    capacity: usize,
    state: Mutex<LogState>,
}

impl Default for AnalysisLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AnalysisLog {
    /// Create a log holding up to `capacity` results (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(LogState {
                entries: VecDeque::with_capacity(capacity),
                total_appended: 0,
                total_evicted: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a result, evicting the oldest when full.
    pub fn append(&self, result: AnalysisResult) {
        let mut state = self.lock();
        if state.entries.len() == self.capacity {
            if let Some(evicted) = state.entries.pop_front() {
                state.total_evicted += 1;
                debug!(
                    device_id = %evicted.device_id,
                    timestamp = %evicted.timestamp,
                    "History entry evicted"
                );
            }
        }
        state.entries.push_back(result);
        state.total_appended += 1;
    }

    /// Most recent result.
    #[must_use]
    pub fn latest(&self) -> Option<AnalysisResult> {
        self.lock().entries.back().cloned()
    }

    /// All results, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AnalysisResult> {
        self.lock().entries.iter().rev().cloned().collect()
    }

    /// All results, oldest first.
    #[must_use]
    pub fn chronological(&self) -> Vec<AnalysisResult> {
        self.lock().entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    #[must_use]
    pub fn total_appended(&self) -> u64 {
        self.lock().total_appended
    }

    #[must_use]
    pub fn total_evicted(&self) -> u64 {
        self.lock().total_evicted
    }

    #[must_use]
    pub fn stats(&self) -> LogStats {
        let state = self.lock();
        LogStats {
            len: state.entries.len(),
            capacity: self.capacity,
            total_appended: state.total_appended,
            total_evicted: state.total_evicted,
        }
    }
}
