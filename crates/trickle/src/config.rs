//! Configuration for the Trickle service

use crate::error::{Result, TrickleError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for Trickle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrickleConfig {
    /// Directory watched for incoming files
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,

    /// Append-only result file shared by all workers
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Maximum number of concurrently running workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Maximum rows a single dispatch may emit
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Directory scan interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub scan_interval_ms: u64,

    /// Dispatch interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// File extension picked up by the scanner (without the dot)
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./result.txt")
}

fn default_max_workers() -> usize {
    4
}

fn default_chunk_size() -> usize {
    3
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_extension() -> String {
    "csv".to_string()
}

impl Default for TrickleConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            output_path: default_output_path(),
            max_workers: default_max_workers(),
            chunk_size: default_chunk_size(),
            scan_interval_ms: default_interval_ms(),
            dispatch_interval_ms: default_interval_ms(),
            extension: default_extension(),
        }
    }
}

impl TrickleConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TrickleConfig =
            toml::from_str(&content).map_err(|e| TrickleError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| TrickleError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(TrickleError::Config("max_workers must be at least 1".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(TrickleError::Config("chunk_size must be at least 1".to_string()));
        }
        if self.scan_interval_ms == 0 || self.dispatch_interval_ms == 0 {
            return Err(TrickleError::Config(
                "scan and dispatch intervals must be non-zero".to_string(),
            ));
        }
        if self.extension.trim_start_matches('.').is_empty() {
            return Err(TrickleError::Config("extension must not be empty".to_string()));
        }
        Ok(())
    }

    /// Extension without a leading dot, as `Path::extension` reports it.
    pub fn normalized_extension(&self) -> &str {
        self.extension.trim_start_matches('.')
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }
}
