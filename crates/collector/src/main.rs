//! pstrace collector - stores events sent by remote tracers
//!
//! # Usage
//!
//! ```bash
//! pstrace-collector
//! pstrace-collector --config configs/collector.toml
//! pstrace-collector --listen 0.0.0.0:4001 --output traces.pb --append
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use pstrace_collector::Collector;
use pstrace_config::{Config, LogConfig, LogFormat, LogOutput};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// pstrace collector - receives remote tracer streams
#[derive(Parser, Debug)]
#[command(name = "pstrace-collector")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Output trace file (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Append to the output file instead of truncating it
    #[arg(long)]
    append: bool,

    /// Log filter, e.g. "debug" or "pstrace_collector=trace" (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.collector.listen = listen;
    }
    if let Some(output) = cli.output {
        config.collector.output = output;
    }
    if cli.append {
        config.collector.append = true;
    }

    init_logging(&config.log, cli.log_level.as_deref())?;

    let collector = Collector::bind(config.collector)
        .await
        .context("failed to start collector")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received Ctrl-C, shutting down");
                signal_cancel.cancel();
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl-C"),
        }
    });

    collector.run(cancel).await;
    Ok(())
}

/// Initialize the tracing subscriber for logging
fn init_logging(log: &LogConfig, level_override: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_new(log.directive(level_override))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let writer = match &log.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };

    let fmt_layer = match log.format {
        LogFormat::Console => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    Ok(())
}
