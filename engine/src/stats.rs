//! Sync statistics, persisted for observability.
//!
//! Counters only: the recorder is read by UIs and diagnostics but never
//! consulted by control flow.

use crate::{queue::SyncReport, Timestamp};
use serde::{Deserialize, Serialize};

/// Cumulative sync counters, persisted after each cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Total sync cycles run
    pub cycles_run: u64,
    /// Cycles in which at least one action succeeded
    pub cycles_with_success: u64,
    /// Cycles in which at least one action failed
    pub cycles_with_failure: u64,
    /// Cumulative actions processed
    pub ops_processed: u64,
    /// Cumulative actions that failed an attempt
    pub ops_failed: u64,
    /// When the most recent cycle finished (ms since epoch)
    pub last_sync_at: Option<Timestamp>,
    /// Most recent per-action error, if any
    pub last_error: Option<String>,
}

impl SyncStats {
    /// Fold a finished cycle into the counters.
    pub fn record_cycle(&mut self, report: &SyncReport, finished_at: Timestamp) {
        self.cycles_run += 1;
        if report.succeeded > 0 {
            self.cycles_with_success += 1;
        }
        if report.failed > 0 {
            self.cycles_with_failure += 1;
        }
        self.ops_processed += u64::from(report.processed);
        self.ops_failed += u64::from(report.failed);
        self.last_sync_at = Some(finished_at);
        if let Some(error) = &report.last_error {
            self.last_error = Some(error.clone());
        }
    }
}
