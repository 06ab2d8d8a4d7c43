//! Directory scanner with polling-based discovery
//!
//! Each tick lists the watched directory once and registers every file with
//! the tracked extension that the tracking table has not seen yet. Files
//! already tracked are left untouched, whatever their status.

use crate::error::Result;
use crate::metrics::Metrics;
use crate::tracking::TrackingTable;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one scan tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Directory entries looked at (any type)
    pub entries_seen: usize,
    /// Files registered by this tick, in listing order
    pub newly_registered: Vec<String>,
}

pub struct DirectoryScanner {
    dir: PathBuf,
    extension: String,
    table: Arc<TrackingTable>,
    metrics: Arc<Metrics>,
}

impl DirectoryScanner {
    pub fn new(
        dir: impl Into<PathBuf>,
        extension: &str,
        table: Arc<TrackingTable>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            table,
            metrics,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List the directory once and register unseen files.
    ///
    /// An unreadable directory is returned as an error before any state is
    /// touched.
    pub fn scan_once(&self) -> Result<ScanOutcome> {
        let entries = std::fs::read_dir(&self.dir)?;
        let mut outcome = ScanOutcome::default();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(dir = %self.dir.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            outcome.entries_seen += 1;

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir || !self.is_tracked_extension(&entry.path()) {
                continue;
            }

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(file = ?file_name, "Skipping file with non UTF-8 name");
                continue;
            };

            if self.table.register(name) {
                info!(file = %name, "Added new file to the queue with status 'not_read'");
                outcome.newly_registered.push(name.to_string());
            }
        }

        self.metrics
            .inc_files_discovered(outcome.newly_registered.len() as u64);
        Ok(outcome)
    }

    fn is_tracked_extension(&self, path: &Path) -> bool {
        path.extension() == Some(OsStr::new(&self.extension))
    }
}
