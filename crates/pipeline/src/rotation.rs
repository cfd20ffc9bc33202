//! Segment rotation
//!
//! Rotation retires the active segment and opens the next ring slot:
//!
//! ```text
//!              ┌─► close task: "]", end input, await sink exit ─┐
//! old segment ─┤                                                ├─► AnalysisJob ─► pool
//!              └─► done signal stored in ring slot ◄────────────┘
//!
//! next slot ──► wait for previous occupant's done ──► launch sink ──► active
//! ```
//!
//! Closing runs on its own task so the writer never waits for a sink to
//! exit. The writer does wait for two things: space in the analysis queue,
//! and the completion signal of whatever job last used the slot it is about
//! to reuse, so a wrap never overwrites a segment still being analysed.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::ack::{AckHandle, AckTracker};
use crate::error::{PipelineError, Result};
use crate::metrics::WriterMetrics;
use crate::pool::{AnalysisJob, JobSender};
use crate::segment::{ActiveSegment, SegmentLayout};
use crate::sink::SinkLauncher;

/// Why a segment was retired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// The size threshold was reached
    Size,
    /// A write to the sink failed
    SinkFailed,
    /// Final rotation at close
    Shutdown,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Size => "size",
            Self::SinkFailed => "sink_failed",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Opens segments and hands closed ones to the analysis pool
pub struct RotationCoordinator {
    layout: SegmentLayout,
    launcher: Arc<dyn SinkLauncher>,
    jobs: JobSender,
    /// Completion signal of the last job per ring slot
    slots: Vec<Option<oneshot::Receiver<()>>>,
    next_index: usize,
    open_retry_interval: Duration,
    acks: AckTracker,
    metrics: Arc<WriterMetrics>,
}

impl RotationCoordinator {
    pub fn new(
        layout: SegmentLayout,
        launcher: Arc<dyn SinkLauncher>,
        jobs: JobSender,
        open_retry_interval: Duration,
        acks: AckTracker,
        metrics: Arc<WriterMetrics>,
    ) -> Self {
        let slots = (0..layout.ring_size()).map(|_| None).collect();
        Self {
            layout,
            launcher,
            jobs,
            slots,
            next_index: 0,
            open_retry_interval,
            acks,
            metrics,
        }
    }

    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    /// Open the first segment; failure here is fatal
    pub async fn open_first(&mut self) -> Result<ActiveSegment> {
        tokio::fs::create_dir_all(self.layout.dir())
            .await
            .map_err(|e| PipelineError::launch(self.layout.dir(), e))?;

        let index = self.next_index;
        let segment = ActiveSegment::open(&self.layout, index, self.launcher.as_ref()).await?;
        self.opened(&segment);
        Ok(segment)
    }

    /// Retire `old` and open the next slot
    ///
    /// Returns `None` only if cancelled before a new segment could be opened.
    pub async fn rotate(
        &mut self,
        old: ActiveSegment,
        held: AckHandle,
        reason: RotationReason,
        cancel: &CancellationToken,
    ) -> Option<ActiveSegment> {
        self.retire(old, held, reason).await;
        self.open_next(cancel).await
    }

    /// Close `old` in the background and queue it for analysis
    ///
    /// `held` holds acknowledgments withheld until the sink exits; they fire
    /// if it exits cleanly and are dropped otherwise.
    pub async fn retire(&mut self, old: ActiveSegment, held: AckHandle, reason: RotationReason) {
        let index = old.index();
        let path: PathBuf = old.path().to_path_buf();

        tracing::info!(
            index,
            segment = %path.display(),
            records = old.records(),
            bytes = old.written(),
            age_secs = old.age().as_secs(),
            reason = %reason,
            "rotating segment"
        );

        let acks = self.acks.clone();
        let metrics = Arc::clone(&self.metrics);
        let close_path = path.clone();
        let closed = tokio::spawn(async move {
            match old.close().await {
                Ok(()) => {
                    acks.fire(held);
                    true
                }
                Err(e) => {
                    metrics.record_close_failure();
                    tracing::error!(
                        segment = %close_path.display(),
                        error = %e,
                        "failed to close segment sink"
                    );
                    acks.drop_unfired(held);
                    false
                }
            }
        });

        let (done_tx, done_rx) = oneshot::channel();
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(done_rx);
        }

        let job = AnalysisJob::new(index, path, closed, done_tx);
        if let Err(job) = self.jobs.submit(job).await {
            tracing::warn!(
                segment = %job.path.display(),
                "analysis pool stopped, segment will not be analysed"
            );
        }
    }

    /// Open the next ring slot, retrying until it succeeds or `cancel` fires
    pub async fn open_next(&mut self, cancel: &CancellationToken) -> Option<ActiveSegment> {
        let index = self.next_index;
        if !self.await_slot(index, cancel).await {
            return None;
        }

        loop {
            match ActiveSegment::open(&self.layout, index, self.launcher.as_ref()).await {
                Ok(segment) => {
                    self.opened(&segment);
                    return Some(segment);
                }
                Err(e) => {
                    self.metrics.record_open_failure();
                    tracing::error!(
                        index,
                        error = %e,
                        retry_ms = self.open_retry_interval.as_millis() as u64,
                        "failed to open segment, retrying"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.open_retry_interval) => {}
            }
        }
    }

    /// Wait until the previous occupant of `index` is done with its file
    ///
    /// Returns false if cancelled while waiting.
    async fn await_slot(&mut self, index: usize, cancel: &CancellationToken) -> bool {
        let Some(mut done) = self.slots.get_mut(index).and_then(Option::take) else {
            return true;
        };
        if !matches!(done.try_recv(), Err(TryRecvError::Empty)) {
            return true;
        }

        tracing::debug!(
            index,
            segment = %self.layout.path(index).display(),
            "waiting for previous occupant of ring slot"
        );
        let finished = tokio::select! {
            _ = cancel.cancelled() => false,
            _ = &mut done => true,
        };
        if !finished && let Some(slot) = self.slots.get_mut(index) {
            // Still occupied; a later open must wait for it again
            *slot = Some(done);
        }
        finished
    }

    fn opened(&mut self, segment: &ActiveSegment) {
        self.next_index = self.layout.next(segment.index());
        self.metrics.record_opened();
        tracing::debug!(
            index = segment.index(),
            segment = %segment.path().display(),
            launcher = self.launcher.name(),
            "segment opened"
        );
    }
}

#[cfg(test)]
#[path = "rotation_test.rs"]
mod rotation_test;
