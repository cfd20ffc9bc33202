//! Downstream result sinks
//!
//! Every analysis report fans out to all configured sinks:
//!
//! ```text
//!                      ┌──► LinePublisher  (TCP, one JSON document per line)
//! AnalysisReport ──────┼──► DocumentStore  (deduplicated JSON-lines file)
//!                      └──► ArchiveRing    (rotating raw-row files)
//! ```
//!
//! Sinks are independent: a failing sink is logged and counted, the others
//! still receive the report.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use capline_config::ResultsConfig;

use crate::error::ResultSinkError;
use crate::trigger::AnalysisReport;

pub mod archive;
pub mod publish;
pub mod store;

pub use archive::ArchiveRing;
pub use publish::LinePublisher;
pub use store::DocumentStore;

/// Outcome of delivering one report to one sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub duplicates: u64,
    pub errors: u64,
}

impl DeliveryStats {
    pub fn delivered(count: u64) -> Self {
        Self {
            delivered: count,
            ..Self::default()
        }
    }
}

/// A destination for analysis reports
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Deliver one report
    async fn deliver(&self, report: &AnalysisReport) -> Result<DeliveryStats, ResultSinkError>;
}

/// Counters across all sinks
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    reports: AtomicU64,
    delivered: AtomicU64,
    duplicates: AtomicU64,
    errors: AtomicU64,
    sink_failures: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`]
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DispatchMetricsSnapshot {
    pub reports: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub sink_failures: u64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, stats: DeliveryStats) {
        self.delivered.fetch_add(stats.delivered, Ordering::Relaxed);
        self.duplicates.fetch_add(stats.duplicates, Ordering::Relaxed);
        self.errors.fetch_add(stats.errors, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            reports: self.reports.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

/// Fans reports out to every configured sink
#[derive(Default)]
pub struct ResultDispatcher {
    sinks: Vec<Box<dyn ResultSink>>,
    metrics: Arc<DispatchMetrics>,
}

impl ResultDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the sinks named in `config`
    pub async fn from_config(config: &ResultsConfig) -> Result<Self, ResultSinkError> {
        let mut dispatcher = Self::new();
        if let Some(publish) = &config.publish {
            dispatcher.add(Box::new(LinePublisher::new(publish.clone())));
        }
        if let Some(store) = &config.store {
            dispatcher.add(Box::new(DocumentStore::open(store).await?));
        }
        if let Some(archive) = &config.archive {
            dispatcher.add(Box::new(ArchiveRing::open(archive).await?));
        }
        Ok(dispatcher)
    }

    pub fn add(&mut self, sink: Box<dyn ResultSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn metrics_handle(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Deliver `report` to every sink
    ///
    /// Empty reports are skipped.
    pub async fn dispatch(&self, report: &AnalysisReport) {
        if report.is_empty() || self.sinks.is_empty() {
            return;
        }
        self.metrics.reports.fetch_add(1, Ordering::Relaxed);

        for sink in &self.sinks {
            match sink.deliver(report).await {
                Ok(stats) => {
                    self.metrics.record(stats);
                    tracing::debug!(
                        sink = sink.name(),
                        segment = %report.segment.display(),
                        delivered = stats.delivered,
                        duplicates = stats.duplicates,
                        errors = stats.errors,
                        "report delivered"
                    );
                }
                Err(e) => {
                    self.metrics.sink_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        sink = sink.name(),
                        segment = %report.segment.display(),
                        error = %e,
                        "result sink failed"
                    );
                }
            }
        }
    }
}
