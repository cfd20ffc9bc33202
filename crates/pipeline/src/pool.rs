//! Analysis worker pool
//!
//! Every rotation produces one [`AnalysisJob`]. Jobs wait in a bounded queue
//! served by a fixed number of workers:
//!
//! ```text
//! rotation ──► JobSender ──► [ bounded queue ] ──► worker 0 ─┐
//!    ▲                                           ──► worker 1 ─┼─► await close
//!    │                                                         │   analyze
//!    └──── waits while full ◄──────────────────────────────────┘   dispatch
//!                                                                  delete
//!                                                                  done ─► ring slot
//! ```
//!
//! When the queue is full, submission waits, so a slow analysis stage slows
//! rotation (and with it ingestion) instead of piling up external processes.
//! Each job signals `done` once its segment file is no longer needed; the
//! rotation coordinator waits on that signal before reusing the ring slot.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use capline_analysis::{AnalysisTrigger, ResultDispatcher};
use capline_config::AnalysisConfig;

use crate::metrics::AnalysisMetrics;

/// Worker pool sizing and segment retention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub workers: usize,
    pub queue_size: usize,
    /// Leave analysed segments on disk
    pub keep_segments: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_size: 4,
            keep_segments: false,
        }
    }
}

impl From<&AnalysisConfig> for PoolSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            workers: config.workers,
            queue_size: config.queue_size,
            keep_segments: config.keep_segments,
        }
    }
}

/// One closed segment awaiting analysis
#[derive(Debug)]
pub struct AnalysisJob {
    pub index: usize,
    pub path: PathBuf,
    /// Close task of the segment's sink; true if the sink exited cleanly
    closed: JoinHandle<bool>,
    /// Signalled once the segment file is no longer needed
    done: oneshot::Sender<()>,
}

impl AnalysisJob {
    pub fn new(
        index: usize,
        path: PathBuf,
        closed: JoinHandle<bool>,
        done: oneshot::Sender<()>,
    ) -> Self {
        Self {
            index,
            path,
            closed,
            done,
        }
    }
}

/// Submits jobs to the pool
#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::Sender<AnalysisJob>,
    metrics: Arc<AnalysisMetrics>,
}

impl JobSender {
    /// Queue `job`, waiting for space if the pool is saturated
    ///
    /// Returns the job back if the pool has shut down.
    pub async fn submit(&self, job: AnalysisJob) -> Result<(), AnalysisJob> {
        let job = match self.tx.try_send(job) {
            Ok(()) => {
                self.metrics.record_submitted();
                return Ok(());
            }
            Err(mpsc::error::TrySendError::Closed(job)) => return Err(job),
            Err(mpsc::error::TrySendError::Full(job)) => job,
        };

        self.metrics.record_submit_wait();
        tracing::debug!(
            segment = %job.path.display(),
            "analysis queue full, rotation waiting"
        );
        self.tx.send(job).await.map_err(|e| e.0)?;
        self.metrics.record_submitted();
        Ok(())
    }
}

/// Fixed set of analysis workers
pub struct AnalysisPool {
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<AnalysisMetrics>,
}

struct Worker {
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<AnalysisJob>>>,
    trigger: Option<Arc<dyn AnalysisTrigger>>,
    dispatcher: Arc<ResultDispatcher>,
    keep_segments: bool,
    metrics: Arc<AnalysisMetrics>,
}

impl AnalysisPool {
    /// Spawn the workers
    ///
    /// Without a trigger the workers only wait for sinks to close, and
    /// segments stay on disk.
    pub fn start(
        trigger: Option<Arc<dyn AnalysisTrigger>>,
        dispatcher: Arc<ResultDispatcher>,
        settings: PoolSettings,
    ) -> (Self, JobSender) {
        let (tx, rx) = mpsc::channel(settings.queue_size.max(1));
        let jobs = Arc::new(Mutex::new(rx));
        let metrics = Arc::new(AnalysisMetrics::new());
        let keep_segments = settings.keep_segments || trigger.is_none();

        let workers = (0..settings.workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    jobs: Arc::clone(&jobs),
                    trigger: trigger.clone(),
                    dispatcher: Arc::clone(&dispatcher),
                    keep_segments,
                    metrics: Arc::clone(&metrics),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::info!(
            workers = settings.workers.max(1),
            queue_size = settings.queue_size.max(1),
            analyzer = trigger.as_ref().map_or("none", |t| t.name()),
            keep_segments,
            "analysis pool started"
        );

        let sender = JobSender {
            tx,
            metrics: Arc::clone(&metrics),
        };
        (Self { workers, metrics }, sender)
    }

    pub fn metrics_handle(&self) -> Arc<AnalysisMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Wait for queued jobs to finish
    ///
    /// Workers exit once every [`JobSender`] is dropped and the queue is
    /// empty. Returns false if the timeout expired; remaining workers are
    /// aborted.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let mut workers = self.workers;
        let drained = tokio::time::timeout(timeout, async {
            for worker in workers.iter_mut() {
                let _ = worker.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "analysis pool did not drain in time, aborting workers"
            );
            for worker in &workers {
                worker.abort();
            }
        }
        drained
    }
}

impl Worker {
    async fn run(self) {
        loop {
            let job = { self.jobs.lock().await.recv().await };
            let Some(job) = job else {
                break;
            };
            self.process(job).await;
        }
        tracing::debug!(worker = self.id, "analysis worker stopped");
    }

    async fn process(&self, job: AnalysisJob) {
        let AnalysisJob {
            index,
            path,
            closed,
            done,
        } = job;

        match closed.await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                segment = %path.display(),
                "sink did not close cleanly, analysing partial segment"
            ),
            Err(e) => tracing::warn!(
                segment = %path.display(),
                error = %e,
                "segment close task did not complete"
            ),
        }

        if let Some(trigger) = &self.trigger {
            match trigger.analyze(&path).await {
                Ok(report) => {
                    self.metrics.record_success(report.elapsed);
                    tracing::info!(
                        worker = self.id,
                        index,
                        segment = %path.display(),
                        results = report.lines.len(),
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        "segment analysed"
                    );
                    self.dispatcher.dispatch(&report).await;
                }
                Err(e) => {
                    self.metrics.record_failure();
                    tracing::error!(
                        worker = self.id,
                        analyzer = trigger.name(),
                        segment = %path.display(),
                        error = %e,
                        "analysis failed, segment findings lost"
                    );
                }
            }
        }

        if !self.keep_segments {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => self.metrics.record_deleted(),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    self.metrics.record_delete_failure();
                    tracing::warn!(
                        segment = %path.display(),
                        error = %e,
                        "failed to delete analysed segment"
                    );
                }
            }
        }

        let _ = done.send(());
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
