//! Error types for Trickle

use crate::tracking::FileStatus;
use std::io;
use thiserror::Error;

/// Trickle error type
#[derive(Error, Debug)]
pub enum TrickleError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Service already started")]
    AlreadyStarted,

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Rejections from `TrackingTable::set_status`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    #[error("File not tracked: {0}")]
    UnknownFile(String),

    #[error("Cannot change status from completed to {requested} for file {file}")]
    CompletedIsTerminal { file: String, requested: FileStatus },

    #[error("Offset for file {file} cannot move backwards ({current} -> {requested})")]
    OffsetRegression {
        file: String,
        current: u64,
        requested: u64,
    },
}

/// Failures appending a chunk to the result sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open result file {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("Failed to write chunk: {0}")]
    Write(#[from] io::Error),

    #[error("Failed to encode row: {0}")]
    Encode(#[from] csv::Error),

    #[error("Sink lock poisoned")]
    Poisoned,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TrickleError>;
