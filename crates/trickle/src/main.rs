//! Trickle launcher
//!
//! Usage:
//!     trickle --watch-dir ./data --output ./result.txt --max-workers 4 --chunk-size 3

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use trickle::{IngestService, TrickleConfig};
use trickle_logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "trickle", about = "Drain CSV files from a directory into one output file")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long)]
    verbose: bool,

    /// TOML config file; flags below override its values
    #[arg(short, long, env = "TRICKLE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory watched for incoming files
    #[arg(long, env = "TRICKLE_WATCH_DIR")]
    watch_dir: Option<PathBuf>,

    /// Result file that every chunk is appended to
    #[arg(short, long, env = "TRICKLE_OUTPUT")]
    output: Option<PathBuf>,

    /// Maximum concurrent workers
    #[arg(long, env = "TRICKLE_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Rows emitted per dispatch
    #[arg(long, env = "TRICKLE_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Directory scan interval in milliseconds
    #[arg(long)]
    scan_interval_ms: Option<u64>,

    /// Dispatch interval in milliseconds
    #[arg(long)]
    dispatch_interval_ms: Option<u64>,

    /// Extension of files to pick up
    #[arg(long)]
    extension: Option<String>,

    /// Directory for log files (default: ~/.trickle/logs)
    #[arg(long, env = "TRICKLE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Print the final status report as JSON on shutdown
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<TrickleConfig> {
        let mut config = match &self.config {
            Some(path) => TrickleConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => TrickleConfig::default(),
        };

        if let Some(dir) = &self.watch_dir {
            config.watch_dir = dir.clone();
        }
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }
        if let Some(max_workers) = self.max_workers {
            config.max_workers = max_workers;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(ms) = self.scan_interval_ms {
            config.scan_interval_ms = ms;
        }
        if let Some(ms) = self.dispatch_interval_ms {
            config.dispatch_interval_ms = ms;
        }
        if let Some(ext) = &self.extension {
            config.extension = ext.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging(LogConfig {
        app_name: "trickle",
        verbose: cli.verbose,
        log_dir: cli.log_dir.clone(),
    })?;

    let config = cli.resolve_config()?;
    info!("Starting Trickle");
    info!("  Watch dir: {}", config.watch_dir.display());
    info!("  Output: {}", config.output_path.display());
    info!("  Max workers: {}", config.max_workers);
    info!("  Chunk size: {}", config.chunk_size);

    let service = Arc::new(
        IngestService::with_file_sink(config).context("Failed to create ingest service")?,
    );
    let handle = service.start()?;

    let mut shutdown_rx = install_signal_handlers()?;
    shutdown_rx.recv().await;

    handle.shutdown().await?;

    let report = service.report();
    info!(
        not_read = report.counts.not_read,
        reading = report.counts.reading,
        completed = report.counts.completed,
        rows_written = report.metrics.rows_written,
        "Final status"
    );
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

/// Resolve once SIGINT/SIGTERM (Ctrl+C on Windows) is received.
fn install_signal_handlers() -> Result<mpsc::UnboundedReceiver<()>> {
    let (tx, rx) = mpsc::unbounded_channel();

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, initiating shutdown...", sig);
                let _ = tx.send(());
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, initiating shutdown...");
            let _ = tx.send(());
        })?;
    }

    Ok(rx)
}
