//! Chunk worker
//!
//! A worker owns one dispatched file for exactly one chunk:
//! - skip the `offset` non-blank rows emitted by earlier chunks
//! - collect up to `chunk_size` further non-blank rows
//! - append them to the sink, then hand the file back as `not_read` (more
//!   rows may follow) or `completed` (fewer than `chunk_size` rows collected)
//!
//! A file that cannot be opened or parsed is left `reading`. Nothing retries
//! it; the slot is released all the same.
//!
//! Completion is only noticed once a chunk comes back short, so a file whose
//! row count is an exact multiple of the chunk size needs one extra, empty
//! dispatch before it is marked completed.

use crate::error::{Result, TrickleError};
use crate::metrics::Metrics;
use crate::scheduler::WorkerSlot;
use crate::sink::{ChunkSink, Row};
use crate::tracking::{Claim, FileStatus, TrackingTable};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Published once when a file reaches `completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCompleted {
    pub name: String,
    /// Total rows emitted for the file
    pub rows: u64,
}

/// How a single dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// A full chunk was read; the file is `not_read` again at `offset`
    Advanced { offset: u64, rows: usize },
    /// A short chunk was read; the file is `completed` at `offset`
    Completed { offset: u64, rows: usize },
    /// Open or parse failure; the file stays `reading`
    Failed,
}

/// Rows gathered by one pass over a file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChunkRead {
    pub rows: Vec<Row>,
    /// Non-blank rows without exactly two fields that were passed over
    pub malformed: usize,
}

/// Read the chunk that starts after `offset` non-blank rows.
pub fn read_chunk(path: &Path, offset: u64, chunk_size: usize) -> Result<ChunkRead> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut chunk = ChunkRead::default();
    let mut to_skip = offset;

    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() != 2 {
            warn!(
                path = %path.display(),
                line = record.position().map(|p| p.line()),
                fields = record.len(),
                "Skipping malformed row"
            );
            chunk.malformed += 1;
            continue;
        }
        if to_skip > 0 {
            to_skip -= 1;
            continue;
        }

        chunk.rows.push(Row::new(&record[0], &record[1]));
        if chunk.rows.len() >= chunk_size {
            break;
        }
    }

    Ok(chunk)
}

/// Shared state every worker needs.
pub struct WorkerContext {
    pub watch_dir: PathBuf,
    pub chunk_size: usize,
    pub table: Arc<TrackingTable>,
    pub sink: Arc<dyn ChunkSink>,
    pub metrics: Arc<Metrics>,
    pub completions: broadcast::Sender<FileCompleted>,
}

/// One dispatch of one file. Holds its worker slot until dropped.
pub struct Worker {
    ctx: Arc<WorkerContext>,
    claim: Claim,
    _slot: WorkerSlot,
}

impl Worker {
    pub(crate) fn new(ctx: Arc<WorkerContext>, claim: Claim, slot: WorkerSlot) -> Self {
        Self {
            ctx,
            claim,
            _slot: slot,
        }
    }

    pub fn file(&self) -> &str {
        &self.claim.name
    }

    pub fn offset(&self) -> u64 {
        self.claim.offset
    }

    /// Process one chunk. Blocking; consumes the worker so the slot is
    /// released exactly once, whichever way this returns.
    pub fn run(self) -> WorkerOutcome {
        let ctx = &self.ctx;
        let name = self.claim.name.as_str();
        let offset = self.claim.offset;
        let path = ctx.watch_dir.join(name);
        info!(file = %name, offset, "Start reading file");

        let chunk = match read_chunk(&path, offset, ctx.chunk_size) {
            Ok(chunk) => chunk,
            Err(TrickleError::Io(e)) => {
                error!(file = %name, error = %e, "Error opening file; leaving it in 'reading'");
                ctx.metrics.inc_worker_failures();
                return WorkerOutcome::Failed;
            }
            Err(e) => {
                error!(file = %name, error = %e, "Error parsing file; leaving it in 'reading'");
                ctx.metrics.inc_worker_failures();
                return WorkerOutcome::Failed;
            }
        };

        let collected = chunk.rows.len();
        if collected > 0 {
            match ctx.sink.append_chunk(&chunk.rows) {
                Ok(()) => ctx.metrics.record_chunk(collected as u64),
                Err(e) => {
                    error!(file = %name, rows = collected, error = %e, "Failed to append chunk; rows dropped");
                    ctx.metrics.inc_sink_failures();
                }
            }
        }

        let new_offset = offset + collected as u64;
        if collected < ctx.chunk_size {
            match ctx.table.set_status(name, FileStatus::Completed, new_offset) {
                Ok(()) => {
                    ctx.metrics.inc_files_completed();
                    info!(file = %name, rows = new_offset, "File has been completed");
                    // No receivers is fine.
                    let _ = ctx.completions.send(FileCompleted {
                        name: name.to_string(),
                        rows: new_offset,
                    });
                }
                Err(e) => warn!(file = %name, error = %e, "Completion not recorded"),
            }
            WorkerOutcome::Completed {
                offset: new_offset,
                rows: collected,
            }
        } else {
            if let Err(e) = ctx.table.set_status(name, FileStatus::NotRead, new_offset) {
                warn!(file = %name, error = %e, "Progress not recorded");
            }
            info!(file = %name, offset = new_offset, "File is set to 'not_read' for further processing");
            WorkerOutcome::Advanced {
                offset: new_offset,
                rows: collected,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn ids(chunk: &ChunkRead) -> Vec<&str> {
        chunk.rows.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_read_chunk_skips_offset_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.csv", "1,a\n2,b\n3,c\n4,d\n5,e\n");

        assert_eq!(ids(&read_chunk(&path, 0, 3).unwrap()), ["1", "2", "3"]);
        assert_eq!(ids(&read_chunk(&path, 3, 3).unwrap()), ["4", "5"]);
        assert!(read_chunk(&path, 5, 3).unwrap().rows.is_empty());
        assert!(read_chunk(&path, 9, 3).unwrap().rows.is_empty());
    }

    #[test]
    fn test_blank_rows_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.csv", "\n1,a\n,\n\n2,b\n , \n3,c\n,\n4,d\n");

        let first = read_chunk(&path, 0, 2).unwrap();
        assert_eq!(ids(&first), ["1", "2"]);

        // " , " has non-empty fields, so it is a real row.
        let second = read_chunk(&path, 2, 2).unwrap();
        assert_eq!(second.rows, vec![Row::new(" ", " "), Row::new("3", "c")]);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.csv", "1,a\nonly-one\n2,b,extra\n3,c\n");

        let chunk = read_chunk(&path, 0, 3).unwrap();
        assert_eq!(ids(&chunk), ["1", "3"]);
        assert_eq!(chunk.malformed, 2);

        assert_eq!(ids(&read_chunk(&path, 1, 3).unwrap()), ["3"]);
    }

    #[test]
    fn test_quoted_fields_are_unescaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.csv", "1,\"Doe, Jane\"\n");

        let chunk = read_chunk(&path, 0, 3).unwrap();
        assert_eq!(chunk.rows, vec![Row::new("1", "Doe, Jane")]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_chunk(&dir.path().join("gone.csv"), 0, 3).unwrap_err();
        assert!(matches!(err, TrickleError::Io(_)));
    }

    #[test]
    fn test_rejected_completion_is_not_published() {
        use crate::scheduler::WorkerSlots;
        use crate::sink::MemorySink;

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.csv", "1,a\n");
        let table = Arc::new(TrackingTable::new());
        table.register("a.csv");
        let claim = table.claim_next().unwrap();
        // Someone else already completed it further along.
        table.set_status("a.csv", FileStatus::Completed, 5).unwrap();

        let metrics = Arc::new(Metrics::new());
        let (completions, mut events) = broadcast::channel(4);
        let ctx = Arc::new(WorkerContext {
            watch_dir: dir.path().to_path_buf(),
            chunk_size: 3,
            table: Arc::clone(&table),
            sink: Arc::new(MemorySink::new()),
            metrics: Arc::clone(&metrics),
            completions,
        });
        let slot = WorkerSlots::new(1).try_acquire().unwrap();

        let outcome = Worker::new(ctx, claim, slot).run();
        assert_eq!(outcome, WorkerOutcome::Completed { offset: 1, rows: 1 });
        assert!(events.try_recv().is_err());
        assert_eq!(metrics.snapshot().files_completed, 0);
        assert_eq!(table.get_offset("a.csv"), Some(5));
    }

    #[test]
    fn test_invalid_utf8_is_csv_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, b"1,\xff\xfe\n").unwrap();

        let err = read_chunk(&path, 0, 3).unwrap_err();
        assert!(matches!(err, TrickleError::Csv(_)));
    }
}
