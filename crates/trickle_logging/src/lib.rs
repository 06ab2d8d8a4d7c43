//! Shared logging utilities for Trickle binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "trickle=info,trickle_logging=info";
const VERBOSE_LOG_FILTER: &str = "trickle=debug,trickle_logging=debug";
const MAX_LOG_FILES: usize = 5;

/// Logging configuration shared by Trickle binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Directory for rolling log files. Defaults to `logs_dir()`.
    pub log_dir: Option<PathBuf>,
}

/// Keeps the background log writer alive. Dropping it flushes pending lines.
pub struct LogGuard {
    _file_guard: WorkerGuard,
    pub log_dir: PathBuf,
}

/// Initialize tracing with a daily rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let log_dir = match config.log_dir {
        Some(dir) => {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            dir
        }
        None => ensure_logs_dir().context("Failed to ensure log directory")?,
    };

    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(sanitize_name(config.app_name))
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(&log_dir)
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard {
        _file_guard: file_guard,
        log_dir,
    })
}

/// Get the Trickle home directory: ~/.trickle
///
/// `TRICKLE_HOME` overrides the location. Falls back to `./.trickle` when no
/// home directory can be determined.
pub fn trickle_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("TRICKLE_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".trickle")
}

/// Get the logs directory: ~/.trickle/logs
pub fn logs_dir() -> PathBuf {
    trickle_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "trickle".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("trickle"), "trickle");
        assert_eq!(sanitize_name("my app/v1"), "my_app_v1");
        assert_eq!(sanitize_name(""), "trickle");
    }

    // Installs the global subscriber; keep it the only test that does.
    #[test]
    fn test_init_logging_creates_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("logs");

        let guard = init_logging(LogConfig {
            app_name: "trickle test",
            verbose: true,
            log_dir: Some(dir.clone()),
        })
        .unwrap();
        tracing::info!("logging initialised");

        assert_eq!(guard.log_dir, dir);
        assert!(dir.is_dir());
        drop(guard);

        let names: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("trickle_test")), "{names:?}");
    }

    #[test]
    fn test_logs_dir_is_under_home() {
        assert!(logs_dir().starts_with(trickle_home()));
        assert!(logs_dir().ends_with("logs"));
    }
}
