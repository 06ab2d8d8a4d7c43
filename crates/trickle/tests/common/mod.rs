//! Shared helpers for trickle integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use trickle::{ChunkSink, IngestService, MemorySink, TrickleConfig};

/// Service over a fresh temp directory, writing into memory.
pub struct TestService {
    pub dir: TempDir,
    pub sink: Arc<MemorySink>,
    pub service: Arc<IngestService>,
}

pub fn config_for(dir: &Path, max_workers: usize, chunk_size: usize) -> TrickleConfig {
    TrickleConfig {
        watch_dir: dir.to_path_buf(),
        output_path: dir.join("result.txt"),
        max_workers,
        chunk_size,
        scan_interval_ms: 10,
        dispatch_interval_ms: 10,
        ..TrickleConfig::default()
    }
}

pub fn test_service(max_workers: usize, chunk_size: usize) -> TestService {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = Arc::new(MemorySink::new());
    let service = IngestService::new(
        config_for(dir.path(), max_workers, chunk_size),
        Arc::clone(&sink) as Arc<dyn ChunkSink>,
    )
    .expect("service");
    TestService {
        dir,
        sink,
        service: Arc::new(service),
    }
}

/// Write `rows` lines of `<prefix><i>,name<i>` into `name`.
///
/// The file is renamed into place so a running scanner never sees it
/// half-written.
pub fn write_rows(dir: &Path, name: &str, prefix: &str, rows: usize) {
    let content: String = (1..=rows)
        .map(|i| format!("{prefix}{i},name{i}\n"))
        .collect();
    let partial = dir.join(format!("{name}.part"));
    std::fs::write(&partial, content).expect("write csv");
    std::fs::rename(&partial, dir.join(name)).expect("rename csv");
}
