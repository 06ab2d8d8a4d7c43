//! Trickle - round-robin, chunked CSV directory drainer
//!
//! Files dropped into a watched directory are drained a few rows at a time
//! into one shared output file, with a fixed ceiling on concurrent workers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐     ┌──────────┐     ┌──────────┐
//! │  Directory  │     │   Tracking   │     │  Scheduler  │     │  Worker  │     │   Sink   │
//! │   Scanner   │────▶│ table/queue  │────▶│ (round robin│────▶│ (1 chunk)│────▶│ (append) │
//! │             │     │              │◀────│  + slots)   │     │          │     │          │
//! └─────────────┘     └──────────────┘     └─────────────┘     └──────────┘     └──────────┘
//!                            ▲                                       │
//!                            └──────────── offset / status ──────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **FileRecord**: status (`not_read`, `reading`, `completed`) plus the
//!   count of rows already emitted
//! - **Chunk**: at most `chunk_size` new rows emitted by one dispatch
//! - **Round robin**: every eligible file gets one dispatch before any file
//!   gets a second

pub mod config;
pub mod error;
pub mod metrics;
pub mod scanner;
pub mod scheduler;
pub mod service;
pub mod sink;
pub mod tracking;
pub mod worker;

// Re-exports for convenience
pub use config::TrickleConfig;
pub use error::{Result, SinkError, TrackingError, TrickleError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use scanner::{DirectoryScanner, ScanOutcome};
pub use scheduler::{Dispatched, Scheduler, WorkerSlot, WorkerSlots};
pub use service::{IngestService, ServiceHandle, ServiceReport};
pub use sink::{ChunkSink, FileSink, MemorySink, Row};
pub use tracking::{Claim, FileRecord, FileStatus, StatusCounts, TrackingTable};
pub use worker::{read_chunk, ChunkRead, FileCompleted, Worker, WorkerContext, WorkerOutcome};
