//! Ingest service
//!
//! Design principles:
//! - One explicitly constructed service owns the tracking table, worker slots,
//!   sink, metrics and channels; nothing is process-global
//! - Two polling loops: directory scan and dispatch. The scanner also wakes
//!   the dispatch loop as soon as it registers a new file
//! - Workers run on the blocking pool; the dispatch loop never waits on them
//! - Graceful shutdown stops both loops, then waits for in-flight workers

use crate::config::TrickleConfig;
use crate::error::{Result, TrickleError};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::scanner::{DirectoryScanner, ScanOutcome};
use crate::scheduler::{Dispatched, Scheduler, WorkerSlots};
use crate::sink::{ChunkSink, FileSink};
use crate::tracking::{FileRecord, FileStatus, StatusCounts, TrackingTable};
use crate::worker::{FileCompleted, WorkerContext};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Capacity of the completion broadcast channel
const COMPLETION_CHANNEL_CAPACITY: usize = 256;

/// Serializable view of the service state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceReport {
    pub counts: StatusCounts,
    pub active_workers: usize,
    pub max_workers: usize,
    pub metrics: MetricsSnapshot,
    pub files: Vec<FileRecord>,
}

pub struct IngestService {
    config: TrickleConfig,
    table: Arc<TrackingTable>,
    metrics: Arc<Metrics>,
    scanner: DirectoryScanner,
    scheduler: Scheduler,
    completions: broadcast::Sender<FileCompleted>,
    file_added: Notify,
    started: AtomicBool,
}

impl IngestService {
    pub fn new(config: TrickleConfig, sink: Arc<dyn ChunkSink>) -> Result<Self> {
        config.validate()?;

        let table = Arc::new(TrackingTable::new());
        let metrics = Arc::new(Metrics::new());
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);

        let scanner = DirectoryScanner::new(
            config.watch_dir.clone(),
            config.normalized_extension(),
            Arc::clone(&table),
            Arc::clone(&metrics),
        );
        let ctx = Arc::new(WorkerContext {
            watch_dir: config.watch_dir.clone(),
            chunk_size: config.chunk_size,
            table: Arc::clone(&table),
            sink,
            metrics: Arc::clone(&metrics),
            completions: completions.clone(),
        });
        let scheduler = Scheduler::new(
            Arc::clone(&table),
            WorkerSlots::new(config.max_workers),
            ctx,
            Arc::clone(&metrics),
        );

        Ok(Self {
            config,
            table,
            metrics,
            scanner,
            scheduler,
            completions,
            file_added: Notify::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Service writing to `config.output_path`.
    pub fn with_file_sink(config: TrickleConfig) -> Result<Self> {
        let sink = Arc::new(FileSink::new(config.output_path.clone()));
        Self::new(config, sink)
    }

    pub fn config(&self) -> &TrickleConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<TrackingTable> {
        &self.table
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn active_workers(&self) -> usize {
        self.scheduler.slots().active()
    }

    /// Receive a `FileCompleted` event for every file that completes after
    /// this call.
    pub fn subscribe(&self) -> broadcast::Receiver<FileCompleted> {
        self.completions.subscribe()
    }

    /// One scanner tick. Failures are counted and logged; tracked files are
    /// unaffected.
    pub fn scan_once(&self) -> Result<ScanOutcome> {
        match self.scanner.scan_once() {
            Ok(outcome) => {
                if !outcome.newly_registered.is_empty() {
                    self.file_added.notify_one();
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!(dir = %self.scanner.dir().display(), error = %e, "Error reading directory; skipping scan");
                self.metrics.inc_scan_failures();
                Err(e)
            }
        }
    }

    /// One scheduler tick.
    pub fn dispatch_once(&self) -> Option<Dispatched> {
        self.scheduler.dispatch_once()
    }

    /// Files currently owned by a worker.
    pub fn reading_files(&self) -> Vec<String> {
        self.table
            .snapshot()
            .into_iter()
            .filter(|r| r.status == FileStatus::Reading)
            .map(|r| r.name)
            .collect()
    }

    /// Every tracked file is completed and no worker is running.
    pub fn is_drained(&self) -> bool {
        let counts = self.table.status_counts();
        counts.not_read == 0 && counts.reading == 0 && self.active_workers() == 0
    }

    pub fn report(&self) -> ServiceReport {
        ServiceReport {
            counts: self.table.status_counts(),
            active_workers: self.active_workers(),
            max_workers: self.config.max_workers,
            metrics: self.metrics.snapshot(),
            files: self.table.snapshot(),
        }
    }

    /// Spawn the scan and dispatch loops. Only the first call starts them.
    pub fn start(self: &Arc<Self>) -> Result<ServiceHandle> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Service already started");
            return Err(TrickleError::AlreadyStarted);
        }

        info!(
            watch_dir = %self.config.watch_dir.display(),
            output = %self.config.output_path.display(),
            max_workers = self.config.max_workers,
            chunk_size = self.config.chunk_size,
            "Starting ingest service"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scan = tokio::spawn(scan_loop(Arc::clone(self), shutdown_rx.clone()));
        let dispatch = tokio::spawn(dispatch_loop(Arc::clone(self), shutdown_rx));

        Ok(ServiceHandle {
            shutdown_tx,
            scan,
            dispatch,
        })
    }
}

/// Handle for controlling a running service. Dropping it stops both loops.
#[must_use = "dropping the handle stops the service"]
pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
    scan: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

impl ServiceHandle {
    /// Stop both loops and wait for in-flight workers to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.scan.await?;
        self.dispatch.await?;
        info!("Ingest service stopped");
        Ok(())
    }
}

async fn scan_loop(service: Arc<IngestService>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(service.config.scan_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            _ = interval.tick() => {
                let svc = Arc::clone(&service);
                // Errors are logged inside scan_once.
                if let Err(e) = tokio::task::spawn_blocking(move || svc.scan_once()).await {
                    error!(error = %e, "Scan task panicked");
                }
            }
        }
    }
    debug!("Scan loop stopped");
}

async fn dispatch_loop(service: Arc<IngestService>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(service.config.dispatch_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: Vec<Dispatched> = Vec::new();

    loop {
        in_flight.retain(|d| !d.handle.is_finished());

        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                info!("Shutdown requested, waiting for {} active workers...", in_flight.len());
                for dispatched in in_flight.drain(..) {
                    if let Err(e) = dispatched.handle.await {
                        error!(file = %dispatched.claim.name, error = %e, "Worker panicked; file left in 'reading'");
                    }
                }
                break;
            }

            _ = interval.tick() => {
                if let Some(d) = service.dispatch_once() {
                    in_flight.push(d);
                }
            }

            _ = service.file_added.notified() => {
                if let Some(d) = service.dispatch_once() {
                    in_flight.push(d);
                }
            }
        }
    }
    debug!("Dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn config_for(dir: &std::path::Path) -> TrickleConfig {
        TrickleConfig {
            watch_dir: dir.to_path_buf(),
            output_path: dir.join("result.txt"),
            max_workers: 2,
            chunk_size: 3,
            scan_interval_ms: 10,
            dispatch_interval_ms: 10,
            ..TrickleConfig::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = TrickleConfig { chunk_size: 0, ..TrickleConfig::default() };
        let result = IngestService::new(config, Arc::new(MemorySink::new()));
        assert!(matches!(result, Err(TrickleError::Config(_))));
    }

    #[test]
    fn test_scan_failure_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir.path().join("missing"));
        let service = IngestService::new(config, Arc::new(MemorySink::new())).unwrap();

        assert!(service.scan_once().is_err());
        assert_eq!(service.metrics().snapshot().scan_failures, 1);
        assert!(service.table().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service =
            Arc::new(IngestService::new(config_for(dir.path()), Arc::new(MemorySink::new())).unwrap());

        let handle = service.start().unwrap();
        assert!(matches!(service.start(), Err(TrickleError::AlreadyStarted)));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let service =
            Arc::new(IngestService::new(config_for(dir.path()), Arc::new(MemorySink::new())).unwrap());

        drop(service.start().unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        std::fs::write(dir.path().join("a.csv"), "1,a\n").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(service.table().is_empty());
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "1,a\n").unwrap();
        let service = IngestService::new(config_for(dir.path()), Arc::new(MemorySink::new())).unwrap();
        service.scan_once().unwrap();

        let json = serde_json::to_value(service.report()).unwrap();
        assert_eq!(json["counts"]["not_read"], 1);
        assert_eq!(json["files"][0]["status"], "not_read");
        assert_eq!(json["max_workers"], 2);
    }
}
