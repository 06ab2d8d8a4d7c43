//! Service counters
//!
//! One `Metrics` instance per service, shared by the scanner, the scheduler
//! and every worker. All fields are atomics so no lock is needed to bump them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    // Scanner
    pub files_discovered: AtomicU64,
    pub scan_failures: AtomicU64,

    // Scheduler
    pub dispatches: AtomicU64,

    // Workers
    pub chunks_written: AtomicU64,
    pub rows_written: AtomicU64,
    pub files_completed: AtomicU64,
    pub worker_failures: AtomicU64,
    pub sink_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc_files_discovered(&self, count: u64) {
        self.files_discovered.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_scan_failures(&self) {
        self.scan_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_dispatches(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_chunk(&self, rows: u64) {
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_files_completed(&self) {
        self.files_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_worker_failures(&self) {
        self.worker_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_sink_failures(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_discovered: self.files_discovered.load(Ordering::Relaxed),
            scan_failures: self.scan_failures.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            files_completed: self.files_completed.load(Ordering::Relaxed),
            worker_failures: self.worker_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub files_discovered: u64,
    pub scan_failures: u64,
    pub dispatches: u64,
    pub chunks_written: u64,
    pub rows_written: u64,
    pub files_completed: u64,
    pub worker_failures: u64,
    pub sink_failures: u64,
}
