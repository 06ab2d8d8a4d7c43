//! Result aggregation: the append-only sink shared by every worker.
//!
//! A chunk is encoded into one buffer first and then written with a single
//! `write_all` while the sink lock is held, so rows from two chunks never
//! interleave in the output.

use crate::error::SinkError;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// One data row of an input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub name: String,
}

impl Row {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Destination for chunks read by workers.
pub trait ChunkSink: Send + Sync {
    /// Append every row of `rows`, in order, as one contiguous write.
    fn append_chunk(&self, rows: &[Row]) -> Result<(), SinkError>;
}

/// Encode rows as `id,name` lines.
pub fn encode_chunk(rows: &[Row]) -> Result<Vec<u8>, SinkError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(rows.len() * 32));
    for row in rows {
        writer.write_record([row.id.as_str(), row.name.as_str()])?;
    }
    writer
        .into_inner()
        .map_err(|e| SinkError::Write(e.into_error()))
}

/// Appends chunks to a file on disk, creating it on first use.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkSink for FileSink {
    fn append_chunk(&self, rows: &[Row]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let buf = encode_chunk(rows)?;

        let _guard = self.lock.lock().map_err(|_| SinkError::Poisoned)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SinkError::Open {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| SinkError::Open {
                path: self.path.display().to_string(),
                source,
            })?;
        file.write_all(&buf)?;
        file.flush()?;

        debug!(path = %self.path.display(), rows = rows.len(), "Appended chunk");
        Ok(())
    }
}

/// Keeps appended output in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Mutex<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = match self.buf.lock() {
            Ok(buf) => buf,
            Err(poisoned) => poisoned.into_inner(),
        };
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl ChunkSink for MemorySink {
    fn append_chunk(&self, rows: &[Row]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let encoded = encode_chunk(rows)?;
        let mut buf = self.buf.lock().map_err(|_| SinkError::Poisoned)?;
        buf.extend_from_slice(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_encode_chunk_plain_rows() {
        let rows = vec![Row::new("1", "alice"), Row::new("2", "bob")];
        let encoded = encode_chunk(&rows).unwrap();
        assert_eq!(String::from_utf8(encoded).unwrap(), "1,alice\n2,bob\n");
    }

    #[test]
    fn test_encode_chunk_quotes_embedded_delimiter() {
        let rows = vec![Row::new("7", "Doe, Jane")];
        let encoded = encode_chunk(&rows).unwrap();
        assert_eq!(String::from_utf8(encoded).unwrap(), "7,\"Doe, Jane\"\n");
    }

    #[test]
    fn test_file_sink_appends_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("out").join("result.txt"));

        sink.append_chunk(&[Row::new("1", "a")]).unwrap();
        sink.append_chunk(&[]).unwrap();
        sink.append_chunk(&[Row::new("2", "b"), Row::new("3", "c")]).unwrap();

        let written = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(written, "1,a\n2,b\n3,c\n");
    }

    #[test]
    fn test_file_sink_reports_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let sink = FileSink::new(dir.path());
        let err = sink.append_chunk(&[Row::new("1", "a")]).unwrap_err();
        assert!(matches!(err, SinkError::Open { .. }));
    }

    #[test]
    fn test_concurrent_chunks_stay_contiguous() {
        let sink = Arc::new(MemorySink::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    let rows: Vec<_> = (0..50).map(|i| Row::new(t.to_string(), i.to_string())).collect();
                    sink.append_chunk(&rows).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = sink.lines();
        assert_eq!(lines.len(), 400);
        for block in lines.chunks(50) {
            let owner = block[0].split(',').next().unwrap();
            for (i, line) in block.iter().enumerate() {
                assert_eq!(line, &format!("{},{}", owner, i));
            }
        }
    }
}
