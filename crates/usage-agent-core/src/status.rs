//! # Status Tracker Module
//!
//! A process-wide, best-effort snapshot of delivery health exposed at
//! `GET /status`. Mirrors the domain/infrastructure split used elsewhere
//! in this codebase: tracking never fails and never blocks the hot path,
//! it just records what the Dispatcher reports.

use crate::dispatcher::DispatchResult;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Process-wide delivery status, serialized verbatim as the `/status`
/// response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub last_report_success: Option<Timestamp>,
    pub current_failure_count: u64,
    pub total_failure_count: u64,
}

impl StatusSnapshot {
    fn new() -> Self {
        Self {
            last_report_success: None,
            current_failure_count: 0,
            total_failure_count: 0,
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse-lock, best-effort process status tracker.
///
/// One mutex guards the whole snapshot, updated only by Dispatcher
/// callbacks. `totalFailureCount` and the rest of the counters are
/// deliberately not persisted across restarts — see `DESIGN.md`.
#[derive(Debug)]
pub struct StatusTracker {
    snapshot: Mutex<StatusSnapshot>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(StatusSnapshot::new()),
        }
    }

    /// overallSuccess: every sender reported success for the batch.
    fn record_success(&self) {
        let mut snapshot = self.snapshot.lock().expect("status mutex poisoned");
        snapshot.last_report_success = Some(Timestamp::now());
        snapshot.current_failure_count = 0;
    }

    /// overallFailure: at least one sender gave up on the batch.
    fn record_failure(&self) {
        let mut snapshot = self.snapshot.lock().expect("status mutex poisoned");
        snapshot.current_failure_count += 1;
        snapshot.total_failure_count += 1;
    }

    /// Fold one batch's [`DispatchResult`] into the snapshot. `overallSuccess`
    /// holds only when every configured sender delivered the batch.
    pub fn record_dispatch_result(&self, result: &DispatchResult) {
        if result.is_complete_success() {
            self.record_success();
        } else {
            self.record_failure();
        }
    }

    /// Take a consistent point-in-time copy of the full status.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.lock().expect("status mutex poisoned").clone()
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
