//! Per-run accounting

use std::time::Duration;
use tracing::info;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The frontier drained
    Completed,
    /// Stopped by a shutdown signal after the final checkpoint
    Interrupted,
    /// Aborted by a fatal error after a best-effort checkpoint
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Interrupted => 130,
            Self::Failed => 1,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one run of the scheduler did
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub pages_completed: usize,
    /// Pages scanned this run that did not pass the quality gate or kept failing
    pub pages_pending: usize,
    pub partitions_ended: Vec<String>,
    pub items_resolved: usize,
    pub items_dropped: usize,
    pub items_sentinel: usize,
    /// Candidates skipped because they were already known
    pub items_known: usize,
    pub retries: u64,
    pub scan_retries: u64,
    pub breaker_trips: u32,
    pub checkpoints: u64,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Completed,
            pages_completed: 0,
            pages_pending: 0,
            partitions_ended: Vec::new(),
            items_resolved: 0,
            items_dropped: 0,
            items_sentinel: 0,
            items_known: 0,
            retries: 0,
            scan_retries: 0,
            breaker_trips: 0,
            checkpoints: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn items_fetched(&self) -> usize {
        self.items_resolved + self.items_dropped + self.items_sentinel
    }

    pub fn log(&self) {
        info!(
            status = %self.status,
            pages_completed = self.pages_completed,
            pages_pending = self.pages_pending,
            partitions_ended = ?self.partitions_ended,
            "Run finished in {:.1}s",
            self.elapsed.as_secs_f64()
        );
        info!(
            resolved = self.items_resolved,
            dropped = self.items_dropped,
            sentinel = self.items_sentinel,
            known = self.items_known,
            retries = self.retries,
            scan_retries = self.scan_retries,
            breaker_trips = self.breaker_trips,
            checkpoints = self.checkpoints,
            "Item summary"
        );
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
