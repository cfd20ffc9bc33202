//! capline - rotating packet-capture segments with per-segment analysis
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline (default)
//! capline
//! capline --config configs/capline.toml
//!
//! # Convert a JSON array or object stream into NDJSON offline
//! capline frame --input capture.json --output capture.ndjson
//! ```

mod cmd;

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use capline_config::{LogConfig, LogFormat, LogOutput};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// capline - rotating packet-capture segments with per-segment analysis
#[derive(Parser, Debug)]
#[command(name = "capline")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline
    Serve(cmd::serve::ServeArgs),

    /// Split a JSON array or object stream into newline-delimited records
    Frame(cmd::frame::FrameArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Serve(mut args)) => {
            // Global --config fills in when the subcommand has none
            if args.config.is_none() {
                args.config = cli.config;
            }
            let loaded = cmd::load_config(args.config.as_deref())?;
            init_logging(&loaded.config.log, cli.log_level.as_deref())?;
            cmd::serve::run(loaded).await
        }
        Some(Command::Frame(args)) => {
            // Records may go to stdout, keep the log out of the way
            let log = LogConfig {
                output: LogOutput::Stderr,
                ..LogConfig::default()
            };
            init_logging(&log, cli.log_level.as_deref())?;
            cmd::frame::run(args)
        }
        // No subcommand = serve
        None => {
            let loaded = cmd::load_config(cli.config.as_deref())?;
            init_logging(&loaded.config.log, cli.log_level.as_deref())?;
            cmd::serve::run(loaded).await
        }
    }
}

/// Initialize the tracing subscriber for logging
///
/// `level_override` comes from `--log-level` and wins over the config file.
fn init_logging(log: &LogConfig, level_override: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_new(log.filter_directive(level_override))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let (writer, ansi) = match &log.output {
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
        LogOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Console => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(ansi),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init(),
    }

    Ok(())
}
