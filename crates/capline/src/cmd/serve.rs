//! Serve command - run the capture pipeline
//!
//! Wires the configured source through ingestion, the segment writer and the
//! analysis pool, then waits for a shutdown signal:
//!
//! ```text
//! SIGINT/SIGTERM ─► cancel ingest ─► writer drains queue ─► pool drains jobs
//!                                    retires last segment    ─► checkpoint source
//!                                                            ─► final metrics
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use capline_analysis::{AnalysisTrigger, CommandAnalyzer, DispatchMetrics, ResultDispatcher};
use capline_config::{Config, MetricsConfig, SourceConfig};
use capline_pipeline::{
    AckMetrics, AckTracker, AnalysisMetrics, AnalysisPool, IngestMetrics, Ingestor,
    MetricsReporter, PoolSettings, QueueMetrics, SegmentWriter, WriterMetrics,
    launcher_from_config, queue,
};
use capline_sources::{FileSource, MessageSource, SourceMetrics, TcpLineSource};

use super::LoadedConfig;

/// Serve command arguments
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to configuration file (defaults to configs/capline.toml if not specified)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Run the serve command
pub async fn run(loaded: LoadedConfig) -> Result<()> {
    let config_path = loaded
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        config = %config_path,
        "capline starting"
    );

    if let Err(e) = run_server(loaded.config).await {
        error!(error = %e, "server error");
        return Err(e);
    }

    info!("capline shutdown complete");
    Ok(())
}

/// Collected metrics handles for reporting
#[derive(Clone)]
struct MetricsHandles {
    source: Arc<SourceMetrics>,
    ingest: Arc<IngestMetrics>,
    queue: Arc<QueueMetrics>,
    writer: Arc<WriterMetrics>,
    acks: Arc<AckMetrics>,
    analysis: Arc<AnalysisMetrics>,
    results: Arc<DispatchMetrics>,
}

/// Main pipeline run loop
async fn run_server(config: Config) -> Result<()> {
    let shutdown_timeout = config.global.shutdown_timeout;

    let source = open_source(&config.source).await?;
    let source_metrics = source.metrics_handle();
    let acks = AckTracker::new();
    let (queue_tx, queue_rx) = queue::channel(&config.queue);
    let queue_metrics = queue_tx.metrics_handle();

    // Result sinks and the analysis pool
    let dispatcher = ResultDispatcher::from_config(&config.results)
        .await
        .context("failed to open result sinks")?;
    let results_metrics = dispatcher.metrics_handle();
    let trigger = config.analysis.as_ref().map(|analysis| {
        info!(program = %analysis.program, "analysis enabled");
        Arc::new(CommandAnalyzer::new(analysis)) as Arc<dyn AnalysisTrigger>
    });
    if trigger.is_none() {
        info!("no analysis configured, segments are kept on disk");
    }
    let settings = config
        .analysis
        .as_ref()
        .map(PoolSettings::from)
        .unwrap_or_default();
    let (pool, jobs) = AnalysisPool::start(trigger, Arc::new(dispatcher), settings);

    // Writer owns the first segment; failing to open it is fatal
    let writer = SegmentWriter::start(
        &config.segment,
        queue_rx,
        launcher_from_config(&config.segment),
        jobs,
        acks.clone(),
    )
    .await
    .context("failed to open first segment")?;

    let ack_metrics = acks.metrics_handle();
    let ingestor = Ingestor::new(source, queue_tx, &config.decode, acks);

    let handles = MetricsHandles {
        source: source_metrics,
        ingest: ingestor.metrics_handle(),
        queue: queue_metrics,
        writer: writer.metrics_handle(),
        acks: ack_metrics,
        analysis: pool.metrics_handle(),
        results: results_metrics,
    };

    let ingest_cancel = CancellationToken::new();
    let writer_cancel = CancellationToken::new();
    let metrics_cancel = CancellationToken::new();

    let mut writer_task = tokio::spawn(writer.run(writer_cancel.clone()));
    let mut ingest_task = tokio::spawn(ingestor.run(ingest_cancel.clone()));

    let metrics_task = if config.metrics.enabled {
        let reporter = build_metrics_reporter(&config.metrics, &handles);
        let cancel = metrics_cancel.clone();
        Some(tokio::spawn(async move {
            reporter.run(cancel).await;
        }))
    } else {
        info!("metrics reporting disabled");
        None
    };

    info!(
        source = config.source.kind(),
        segment_dir = %config.segment.dir.display(),
        ring_size = config.segment.ring_size,
        rotate_size = config.segment.rotate_size,
        metrics_enabled = config.metrics.enabled,
        "capline running"
    );

    // A source that runs dry (file without follow) ends the run too
    let finished = tokio::select! {
        _ = wait_for_shutdown() => {
            info!("shutdown signal received, stopping capline...");
            None
        }
        result = &mut ingest_task => {
            info!("ingestion finished, stopping capline...");
            Some(result)
        }
    };

    // Stop consuming; the writer sees the queue close once ingestion exits
    ingest_cancel.cancel();
    let source = match finished {
        Some(result) => result.map_err(|e| warn!(error = %e, "ingest task panicked")).ok(),
        None => join_within("ingest", shutdown_timeout, &mut ingest_task).await,
    };
    if source.is_none() {
        ingest_task.abort();
    }

    info!("waiting for segment writer to drain...");
    if join_within("segment writer", shutdown_timeout, &mut writer_task)
        .await
        .is_none()
    {
        // Give up waiting on rotations and reopen retries
        writer_cancel.cancel();
        if join_within("segment writer", shutdown_timeout, &mut writer_task)
            .await
            .is_none()
        {
            writer_task.abort();
        }
    }

    info!("waiting for analysis to finish...");
    if !pool.shutdown(shutdown_timeout).await {
        warn!("analysis did not finish within timeout");
    }

    // Acknowledgments fired while draining are only durable after this
    if let Some(mut source) = source
        && let Err(e) = source.checkpoint().await
    {
        warn!(source = source.id(), error = %e, "final checkpoint failed");
    }

    metrics_cancel.cancel();
    if let Some(task) = metrics_task {
        task.abort();
    }
    build_metrics_reporter(&config.metrics, &handles).report();

    Ok(())
}

/// Open the configured upstream source; failure is fatal
async fn open_source(config: &SourceConfig) -> Result<Box<dyn MessageSource>> {
    let source: Box<dyn MessageSource> = match config {
        SourceConfig::File(file) => {
            let source = FileSource::open(file)
                .await
                .with_context(|| format!("failed to open source file {}", file.path.display()))?;
            info!(
                path = %file.path.display(),
                follow = file.follow,
                "file source opened"
            );
            Box::new(source)
        }
        SourceConfig::Tcp(tcp) => {
            let source = TcpLineSource::bind(tcp)
                .await
                .context("failed to bind TCP source")?;
            info!(addr = %source.local_addr(), "TCP source listening");
            Box::new(source)
        }
    };
    Ok(source)
}

/// Build the metrics reporter with all component handles
fn build_metrics_reporter(config: &MetricsConfig, handles: &MetricsHandles) -> MetricsReporter {
    let handles = handles.clone();
    MetricsReporter::new(config.clone())
        .source(handles.source)
        .ingest(handles.ingest)
        .queue(handles.queue)
        .writer(handles.writer)
        .acks(handles.acks)
        .analysis(handles.analysis)
        .results(handles.results)
}

/// Await `task` for at most `timeout`
///
/// Returns `None` if the task panicked or is still running.
async fn join_within<T>(name: &str, timeout: Duration, task: &mut JoinHandle<T>) -> Option<T> {
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(task = name, error = %e, "task panicked during shutdown");
            None
        }
        Err(_) => {
            warn!(task = name, "task did not finish within timeout, continuing shutdown");
            None
        }
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
