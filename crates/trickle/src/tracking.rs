//! Per-file tracking table and round-robin work queue.
//!
//! Every tracked file has exactly one [`FileRecord`]. Records are created
//! once by the scanner and never removed; the work queue mirrors the table
//! keys in registration order so the round-robin cursor keeps seeing
//! completed files (and skipping them).
//!
//! All state lives behind one mutex. Each public method takes the lock once,
//! so a status and its offset are always read and written together.

use crate::error::TrackingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Processing status of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Waiting for its next chunk to be dispatched
    NotRead,
    /// A worker currently owns the file
    Reading,
    /// Exhausted; terminal
    Completed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::NotRead => "not_read",
            FileStatus::Reading => "reading",
            FileStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Completed)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub status: FileStatus,
    /// Non-blank data rows already emitted in earlier chunks
    pub offset: u64,
    /// Number of times the file has been handed to a worker
    pub dispatches: u64,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            name,
            status: FileStatus::NotRead,
            offset: 0,
            dispatches: 0,
            discovered_at: now,
            updated_at: now,
        }
    }
}

/// A file claimed for dispatch together with the offset to resume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub name: String,
    pub offset: u64,
}

/// Count of tracked files per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub not_read: usize,
    pub reading: usize,
    pub completed: usize,
}

#[derive(Debug, Default)]
struct TableState {
    records: HashMap<String, FileRecord>,
    queue: Vec<String>,
    cursor: usize,
}

impl TableState {
    /// Circular scan from the cursor, at most one probe per queue entry.
    /// On a hit the cursor moves just past the returned position.
    fn next_matching(&mut self, eligible: impl Fn(FileStatus) -> bool) -> Option<usize> {
        let len = self.queue.len();
        if len == 0 {
            return None;
        }
        for i in 0..len {
            let index = (self.cursor + i) % len;
            let status = self
                .records
                .get(&self.queue[index])
                .map(|record| record.status)
                .unwrap_or(FileStatus::Completed);
            if eligible(status) {
                self.cursor = (index + 1) % len;
                return Some(index);
            }
        }
        None
    }
}

/// Mapping from file name to processing state, plus the round-robin queue.
#[derive(Debug, Default)]
pub struct TrackingTable {
    state: Mutex<TableState>,
}

impl TrackingTable {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation replaces a whole record, so a poisoned lock still guards
    // consistent data.
    fn state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking `name` as `NotRead` at offset 0.
    ///
    /// Returns `false` (and changes nothing) when the file is already tracked.
    pub fn register(&self, name: &str) -> bool {
        let mut state = self.state();
        if state.records.contains_key(name) {
            return false;
        }
        state
            .records
            .insert(name.to_string(), FileRecord::new(name.to_string()));
        state.queue.push(name.to_string());
        true
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.state().records.contains_key(name)
    }

    pub fn get_status(&self, name: &str) -> Option<FileStatus> {
        self.state().records.get(name).map(|record| record.status)
    }

    pub fn get_offset(&self, name: &str) -> Option<u64> {
        self.state().records.get(name).map(|record| record.offset)
    }

    pub fn get(&self, name: &str) -> Option<FileRecord> {
        self.state().records.get(name).cloned()
    }

    /// Replace the status and offset of `name` in one step.
    ///
    /// Rejected, logged and left unapplied: unknown files, any move away from
    /// `Completed`, and offsets lower than the stored one.
    pub fn set_status(
        &self,
        name: &str,
        status: FileStatus,
        offset: u64,
    ) -> Result<(), TrackingError> {
        let mut state = self.state();
        let Some(record) = state.records.get_mut(name) else {
            warn!(file = %name, %status, "Cannot update status of untracked file");
            return Err(TrackingError::UnknownFile(name.to_string()));
        };

        if record.status.is_terminal() && !status.is_terminal() {
            warn!(file = %name, requested = %status, "Cannot change status from completed");
            return Err(TrackingError::CompletedIsTerminal {
                file: name.to_string(),
                requested: status,
            });
        }

        if offset < record.offset {
            warn!(
                file = %name,
                current = record.offset,
                requested = offset,
                "Refusing to move offset backwards"
            );
            return Err(TrackingError::OffsetRegression {
                file: name.to_string(),
                current: record.offset,
                requested: offset,
            });
        }

        record.status = status;
        record.offset = offset;
        record.updated_at = Utc::now();
        debug!(file = %name, %status, offset, "File status updated");
        Ok(())
    }

    /// Next file in round-robin order whose status is not `Completed`.
    ///
    /// Files currently `Reading` count as eligible here; use
    /// [`TrackingTable::claim_next`] to pick a file for dispatch.
    pub fn pick_next_file(&self) -> Option<String> {
        let mut state = self.state();
        let index = state.next_matching(|status| !status.is_terminal())?;
        Some(state.queue[index].clone())
    }

    /// Pick the next `NotRead` file in round-robin order and mark it
    /// `Reading`, keeping its offset, in one locked step.
    ///
    /// Skipping files that are already `Reading` is what keeps two dispatches
    /// from ever owning the same file.
    pub fn claim_next(&self) -> Option<Claim> {
        let mut state = self.state();
        let index = state.next_matching(|status| status == FileStatus::NotRead)?;
        let name = state.queue[index].clone();
        let record = state.records.get_mut(&name)?;
        record.status = FileStatus::Reading;
        record.dispatches += 1;
        record.updated_at = Utc::now();
        debug!(file = %name, offset = record.offset, "File status updated to reading");
        Some(Claim {
            offset: record.offset,
            name,
        })
    }

    /// All records in queue (registration) order.
    pub fn snapshot(&self) -> Vec<FileRecord> {
        let state = self.state();
        state
            .queue
            .iter()
            .filter_map(|name| state.records.get(name).cloned())
            .collect()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let state = self.state();
        let mut counts = StatusCounts::default();
        for record in state.records.values() {
            match record.status {
                FileStatus::NotRead => counts.not_read += 1,
                FileStatus::Reading => counts.reading += 1,
                FileStatus::Completed => counts.completed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
