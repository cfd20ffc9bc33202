//! Pipeline metrics
//!
//! Each component owns an atomic counter struct and hands out an `Arc` to it.
//! All counters use relaxed ordering; snapshots are eventually consistent.
//! [`MetricsReporter`] logs snapshots of every registered component at a
//! fixed interval in human or JSON form.

use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use capline_analysis::{DispatchMetrics, DispatchMetricsSnapshot};
use capline_config::{MetricsConfig, MetricsFormat};
use capline_sources::{SourceMetrics, SourceMetricsSnapshot};

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

// ============================================================================
// Ingest
// ============================================================================

/// Upstream-consuming actor counters
#[derive(Debug, Default)]
pub struct IngestMetrics {
    messages: AtomicU64,
    bytes: AtomicU64,
    /// Records decoded straight from a payload
    records_decoded: AtomicU64,
    /// Records recovered by the framer
    frames: AtomicU64,
    /// Balanced objects the framer could not decode
    malformed: AtomicU64,
    /// Objects discarded for exceeding the frame size limit
    oversized: AtomicU64,
    /// Messages acknowledged without producing a record
    acked_immediately: AtomicU64,
    poll_errors: AtomicU64,
    checkpoint_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestMetricsSnapshot {
    pub messages: u64,
    pub bytes: u64,
    pub records_decoded: u64,
    pub frames: u64,
    pub malformed: u64,
    pub oversized: u64,
    pub acked_immediately: u64,
    pub poll_errors: u64,
    pub checkpoint_errors: u64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_message(&self, bytes: usize) {
        bump(&self.messages);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decoded(&self) {
        bump(&self.records_decoded);
    }

    #[inline]
    pub fn record_frames(&self, count: usize) {
        self.frames.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Discards reported by a framer since its previous stats
    #[inline]
    pub fn record_discarded(&self, malformed: u64, oversized: u64) {
        self.malformed.fetch_add(malformed, Ordering::Relaxed);
        self.oversized.fetch_add(oversized, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_acked_immediately(&self) {
        bump(&self.acked_immediately);
    }

    #[inline]
    pub fn record_poll_error(&self) {
        bump(&self.poll_errors);
    }

    #[inline]
    pub fn record_checkpoint_error(&self) {
        bump(&self.checkpoint_errors);
    }

    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        IngestMetricsSnapshot {
            messages: load(&self.messages),
            bytes: load(&self.bytes),
            records_decoded: load(&self.records_decoded),
            frames: load(&self.frames),
            malformed: load(&self.malformed),
            oversized: load(&self.oversized),
            acked_immediately: load(&self.acked_immediately),
            poll_errors: load(&self.poll_errors),
            checkpoint_errors: load(&self.checkpoint_errors),
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Ingestion queue counters
#[derive(Debug, Default)]
pub struct QueueMetrics {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    /// Enqueue attempts that timed out on a full queue
    full_retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueMetricsSnapshot {
    pub enqueued: u64,
    pub dequeued: u64,
    pub depth: u64,
    pub full_retries: u64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_enqueued(&self) {
        bump(&self.enqueued);
    }

    #[inline]
    pub fn record_dequeued(&self) {
        bump(&self.dequeued);
    }

    #[inline]
    pub fn record_full_retry(&self) {
        bump(&self.full_retries);
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        let enqueued = load(&self.enqueued);
        let dequeued = load(&self.dequeued);
        QueueMetricsSnapshot {
            enqueued,
            dequeued,
            depth: enqueued.saturating_sub(dequeued),
            full_retries: load(&self.full_retries),
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Segment writer and rotation counters
#[derive(Debug, Default)]
pub struct WriterMetrics {
    records: AtomicU64,
    bytes: AtomicU64,
    write_errors: AtomicU64,
    /// Records that arrived with no open segment
    records_dropped: AtomicU64,
    flushes: AtomicU64,
    rotations: AtomicU64,
    segments_opened: AtomicU64,
    open_failures: AtomicU64,
    close_failures: AtomicU64,
    stalls: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WriterMetricsSnapshot {
    pub records: u64,
    pub bytes: u64,
    pub write_errors: u64,
    pub records_dropped: u64,
    pub flushes: u64,
    pub rotations: u64,
    pub segments_opened: u64,
    pub open_failures: u64,
    pub close_failures: u64,
    pub stalls: u64,
}

impl WriterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_written(&self, bytes: usize) {
        bump(&self.records);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write_error(&self) {
        bump(&self.write_errors);
    }

    #[inline]
    pub fn record_dropped(&self) {
        bump(&self.records_dropped);
    }

    #[inline]
    pub fn record_flush(&self) {
        bump(&self.flushes);
    }

    #[inline]
    pub fn record_rotation(&self) {
        bump(&self.rotations);
    }

    #[inline]
    pub fn record_opened(&self) {
        bump(&self.segments_opened);
    }

    #[inline]
    pub fn record_open_failure(&self) {
        bump(&self.open_failures);
    }

    #[inline]
    pub fn record_close_failure(&self) {
        bump(&self.close_failures);
    }

    #[inline]
    pub fn record_stall(&self) {
        bump(&self.stalls);
    }

    pub fn snapshot(&self) -> WriterMetricsSnapshot {
        WriterMetricsSnapshot {
            records: load(&self.records),
            bytes: load(&self.bytes),
            write_errors: load(&self.write_errors),
            records_dropped: load(&self.records_dropped),
            flushes: load(&self.flushes),
            rotations: load(&self.rotations),
            segments_opened: load(&self.segments_opened),
            open_failures: load(&self.open_failures),
            close_failures: load(&self.close_failures),
            stalls: load(&self.stalls),
        }
    }
}

// ============================================================================
// Acknowledgments
// ============================================================================

/// Upstream acknowledgment counters
#[derive(Debug, Default)]
pub struct AckMetrics {
    /// Individual callbacks that ran successfully
    fired: AtomicU64,
    failed: AtomicU64,
    /// Callbacks discarded unfired (the upstream will redeliver)
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AckMetricsSnapshot {
    pub fired: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl AckMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_fired(&self, count: usize) {
        self.fired.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed(&self, count: usize) {
        self.failed.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self, count: usize) {
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AckMetricsSnapshot {
        AckMetricsSnapshot {
            fired: load(&self.fired),
            failed: load(&self.failed),
            dropped: load(&self.dropped),
        }
    }
}

// ============================================================================
// Analysis pool
// ============================================================================

/// Analysis worker pool counters
#[derive(Debug, Default)]
pub struct AnalysisMetrics {
    submitted: AtomicU64,
    /// Submissions that had to wait for queue space
    submit_waits: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    deleted: AtomicU64,
    delete_failures: AtomicU64,
    analysis_ns: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnalysisMetricsSnapshot {
    pub submitted: u64,
    pub submit_waits: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub deleted: u64,
    pub delete_failures: u64,
    /// Mean analysis duration in milliseconds
    pub avg_ms: f64,
}

impl AnalysisMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_submitted(&self) {
        bump(&self.submitted);
    }

    #[inline]
    pub fn record_submit_wait(&self) {
        bump(&self.submit_waits);
    }

    #[inline]
    pub fn record_success(&self, elapsed: Duration) {
        bump(&self.succeeded);
        self.analysis_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self) {
        bump(&self.failed);
    }

    #[inline]
    pub fn record_deleted(&self) {
        bump(&self.deleted);
    }

    #[inline]
    pub fn record_delete_failure(&self) {
        bump(&self.delete_failures);
    }

    pub fn snapshot(&self) -> AnalysisMetricsSnapshot {
        let succeeded = load(&self.succeeded);
        let avg_ms = if succeeded == 0 {
            0.0
        } else {
            load(&self.analysis_ns) as f64 / succeeded as f64 / 1_000_000.0
        };
        AnalysisMetricsSnapshot {
            submitted: load(&self.submitted),
            submit_waits: load(&self.submit_waits),
            succeeded,
            failed: load(&self.failed),
            deleted: load(&self.deleted),
            delete_failures: load(&self.delete_failures),
            avg_ms,
        }
    }
}

// ============================================================================
// Reporter
// ============================================================================

/// Everything the reporter knows about, at one instant
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceMetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestMetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueMetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer: Option<WriterMetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acks: Option<AckMetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisMetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<DispatchMetricsSnapshot>,
}

impl PipelineSnapshot {
    /// One line per component
    pub fn to_human(&self) -> String {
        let mut out = String::new();
        if let Some(s) = &self.source {
            let _ = writeln!(
                out,
                "[metrics] source: {} msgs | {} bytes | {} conn | {} too long | {} commits | {} err",
                s.messages_received,
                s.bytes_received,
                s.connections_active,
                s.lines_too_long,
                s.commits,
                s.errors
            );
        }
        if let Some(i) = &self.ingest {
            let _ = writeln!(
                out,
                "[metrics] ingest: {} msgs | {} decoded | {} framed | {} malformed | {} acked early | {} poll err",
                i.messages,
                i.records_decoded,
                i.frames,
                i.malformed + i.oversized,
                i.acked_immediately,
                i.poll_errors
            );
        }
        if let Some(q) = &self.queue {
            let _ = writeln!(
                out,
                "[metrics] queue: depth {} | {} in | {} out | {} full retries",
                q.depth, q.enqueued, q.dequeued, q.full_retries
            );
        }
        if let Some(w) = &self.writer {
            let _ = writeln!(
                out,
                "[metrics] writer: {} records | {} bytes | {} rotations | {} write err | {} stalls",
                w.records, w.bytes, w.rotations, w.write_errors, w.stalls
            );
        }
        if let Some(a) = &self.acks {
            let _ = writeln!(
                out,
                "[metrics] acks: {} fired | {} failed | {} dropped",
                a.fired, a.failed, a.dropped
            );
        }
        if let Some(a) = &self.analysis {
            let _ = writeln!(
                out,
                "[metrics] analysis: {} submitted | {} ok | {} failed | {:.1}ms avg | {} deleted",
                a.submitted, a.succeeded, a.failed, a.avg_ms, a.deleted
            );
        }
        if let Some(r) = &self.results {
            let _ = writeln!(
                out,
                "[metrics] results: {} reports | {} delivered | {} dup | {} err | {} sink failures",
                r.reports, r.delivered, r.duplicates, r.errors, r.sink_failures
            );
        }
        out
    }
}

/// Periodic metrics logger
#[derive(Default)]
pub struct MetricsReporter {
    config: MetricsConfig,
    source: Option<Arc<SourceMetrics>>,
    ingest: Option<Arc<IngestMetrics>>,
    queue: Option<Arc<QueueMetrics>>,
    writer: Option<Arc<WriterMetrics>>,
    acks: Option<Arc<AckMetrics>>,
    analysis: Option<Arc<AnalysisMetrics>>,
    results: Option<Arc<DispatchMetrics>>,
}

impl MetricsReporter {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn source(mut self, metrics: Arc<SourceMetrics>) -> Self {
        self.source = Some(metrics);
        self
    }

    pub fn ingest(mut self, metrics: Arc<IngestMetrics>) -> Self {
        self.ingest = Some(metrics);
        self
    }

    pub fn queue(mut self, metrics: Arc<QueueMetrics>) -> Self {
        self.queue = Some(metrics);
        self
    }

    pub fn writer(mut self, metrics: Arc<WriterMetrics>) -> Self {
        self.writer = Some(metrics);
        self
    }

    pub fn acks(mut self, metrics: Arc<AckMetrics>) -> Self {
        self.acks = Some(metrics);
        self
    }

    pub fn analysis(mut self, metrics: Arc<AnalysisMetrics>) -> Self {
        self.analysis = Some(metrics);
        self
    }

    pub fn results(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.results = Some(metrics);
        self
    }

    /// Collect a snapshot of every registered component
    pub fn collect(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            source: self.source.as_ref().map(|m| m.snapshot()),
            ingest: self.ingest.as_ref().map(|m| m.snapshot()),
            queue: self.queue.as_ref().map(|m| m.snapshot()),
            writer: self.writer.as_ref().map(|m| m.snapshot()),
            acks: self.acks.as_ref().map(|m| m.snapshot()),
            analysis: self.analysis.as_ref().map(|m| m.snapshot()),
            results: self.results.as_ref().map(|m| m.snapshot()),
        }
    }

    /// Log one snapshot in the configured format
    pub fn report(&self) {
        let snapshot = self.collect();
        match self.config.format {
            MetricsFormat::Human => {
                for line in snapshot.to_human().lines() {
                    tracing::info!("{}", line);
                }
            }
            MetricsFormat::Json => match serde_json::to_string(&snapshot) {
                Ok(json) => tracing::info!(metrics = %json, "metrics"),
                Err(e) => tracing::warn!(error = %e, "failed to serialise metrics"),
            },
        }
    }

    /// Report every interval until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        if !self.config.enabled {
            tracing::info!("metrics reporting disabled");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            format = ?self.config.format,
            "metrics reporter started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.report(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_depth_from_counters() {
        let metrics = QueueMetrics::new();
        for _ in 0..5 {
            metrics.record_enqueued();
        }
        metrics.record_dequeued();
        metrics.record_dequeued();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.depth, 3);
    }

    #[test]
    fn test_analysis_average() {
        let metrics = AnalysisMetrics::new();
        metrics.record_success(Duration::from_millis(10));
        metrics.record_success(Duration::from_millis(30));
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.succeeded, 2);
        assert_eq!(snapshot.failed, 1);
        assert!((snapshot.avg_ms - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_reporter_collects_registered_only() {
        let writer = Arc::new(WriterMetrics::new());
        writer.record_written(42);
        writer.record_rotation();

        let reporter = MetricsReporter::new(MetricsConfig::default()).writer(Arc::clone(&writer));
        let snapshot = reporter.collect();

        assert!(snapshot.ingest.is_none());
        let w = snapshot.writer.unwrap();
        assert_eq!(w.records, 1);
        assert_eq!(w.bytes, 42);
        assert_eq!(w.rotations, 1);

        let human = snapshot.to_human();
        assert_eq!(human.lines().count(), 1);
        assert!(human.contains("1 rotations"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("queue").is_none());
        assert_eq!(json["writer"]["bytes"], 42);
    }
}
