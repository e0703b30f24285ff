//! Run counters and the end-of-run summary

use crate::types::SkipReason;
use crate::utils::format_elapsed;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free counters updated by every worker
#[derive(Debug, Default)]
pub struct RunStats {
    work_items: AtomicU64,
    not_started: AtomicU64,
    enqueued: AtomicU64,
    skipped: [AtomicU64; 4],
    failed: AtomicU64,
    transform_failures: AtomicU64,
    rows_written: AtomicU64,
    pages: AtomicU64,
}

impl RunStats {
    /// Fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the workload
    pub fn set_work_items(&self, n: u64) {
        self.work_items.store(n, Ordering::SeqCst);
    }

    /// Items dropped by cancellation before any fetch
    pub fn add_not_started(&self, n: u64) {
        self.not_started.fetch_add(n, Ordering::SeqCst);
    }

    /// A payload was put on the work queue
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::SeqCst);
    }

    /// A fetch ended in a classified skip
    pub fn record_skip(&self, reason: SkipReason) {
        self.skipped[skip_index(reason)].fetch_add(1, Ordering::SeqCst);
    }

    /// A failure was recorded to the error log
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    /// A payload could not be transformed
    pub fn record_transform_failure(&self) {
        self.transform_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Rows handed to partition writers
    pub fn add_rows(&self, n: u64) {
        self.rows_written.fetch_add(n, Ordering::SeqCst);
    }

    /// A page was retrieved
    pub fn record_page(&self) {
        self.pages.fetch_add(1, Ordering::SeqCst);
    }

    /// Rows handed to partition writers so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::SeqCst)
    }

    /// Freeze the counters into a summary
    pub fn summary(&self, partitions: usize, elapsed: Duration) -> RunSummary {
        let load = |a: &AtomicU64| a.load(Ordering::SeqCst);
        RunSummary {
            work_items: load(&self.work_items),
            not_started: load(&self.not_started),
            enqueued: load(&self.enqueued),
            skipped: SkipReason::ALL
                .iter()
                .map(|r| (*r, load(&self.skipped[skip_index(*r)])))
                .collect(),
            failed: load(&self.failed),
            transform_failures: load(&self.transform_failures),
            rows_written: load(&self.rows_written),
            pages: load(&self.pages),
            partitions,
            elapsed,
        }
    }
}

fn skip_index(reason: SkipReason) -> usize {
    match reason {
        SkipReason::EmptyBody => 0,
        SkipReason::NoContent => 1,
        SkipReason::NotEntitled => 2,
        SkipReason::NotFound => 3,
    }
}

/// Outcome of a finished run
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    /// Work items generated
    pub work_items: u64,
    /// Work items never fetched because the run was cancelled
    pub not_started: u64,
    /// Payloads put on the work queue
    pub enqueued: u64,
    /// Skips per reason
    pub skipped: Vec<(SkipReason, u64)>,
    /// Failures written to the error log
    pub failed: u64,
    /// Payloads that could not be transformed
    pub transform_failures: u64,
    /// Rows handed to partition writers
    pub rows_written: u64,
    /// Pages retrieved
    pub pages: u64,
    /// Monthly files touched
    pub partitions: usize,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl RunSummary {
    /// Skips across all reasons
    pub fn skipped_total(&self) -> u64 {
        self.skipped.iter().map(|(_, n)| n).sum()
    }

    /// Rows + skips + recorded failures + transform failures + never-started items
    pub fn accounted(&self) -> u64 {
        self.rows_written
            + self.skipped_total()
            + self.failed
            + self.transform_failures
            + self.not_started
    }

    /// True when every work item is covered by at least one outcome
    pub fn is_fully_accounted(&self) -> bool {
        self.accounted() >= self.work_items
    }

    /// Emit the one-line run summary
    pub fn log(&self) {
        tracing::info!(
            work_items = self.work_items,
            enqueued = self.enqueued,
            skipped = self.skipped_total(),
            failed = self.failed,
            transform_failures = self.transform_failures,
            rows_written = self.rows_written,
            pages = self.pages,
            partitions = self.partitions,
            not_started = self.not_started,
            elapsed = %format_elapsed(self.elapsed),
            "run finished"
        );
        for (reason, n) in self.skipped.iter().filter(|(_, n)| *n > 0) {
            tracing::debug!(reason = %reason, count = n, "skips by reason");
        }
    }
}
