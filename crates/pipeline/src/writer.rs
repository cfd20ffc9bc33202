//! Segment writer
//!
//! The single consumer of the ingestion queue. It appends each record to the
//! active segment, fires or holds its acknowledgment, and rotates once the
//! segment reaches the size threshold:
//!
//! ```text
//! QueueReceiver ──► append ──► ack (handoff) ──► flush every N ──► size check
//!                                │                                    │
//!                                └─► held until close (segment_closed) ▼
//!                                                         RotationCoordinator
//! ```
//!
//! Records are written strictly in queue order. A failed write marks the
//! segment failed and forces a rotation on the spot, so one broken sink never
//! swallows more than the record that hit it.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use capline_config::{AckMode, SegmentConfig, SizeMeasure};

use crate::ack::{AckHandle, AckTracker};
use crate::error::Result;
use crate::metrics::WriterMetrics;
use crate::pool::JobSender;
use crate::queue::{Dequeued, QueueItem, QueueReceiver};
use crate::rate_limited::RateLimitedLogger;
use crate::rotation::{RotationCoordinator, RotationReason};
use crate::segment::{ActiveSegment, SegmentLayout};
use crate::sink::SinkLauncher;
use crate::watchdog::StallWatchdog;

/// Drains the queue into rotating segments
pub struct SegmentWriter {
    queue: QueueReceiver,
    coordinator: RotationCoordinator,
    active: Option<ActiveSegment>,
    acks: AckTracker,
    ack_mode: AckMode,
    /// Acknowledgments waiting for the active segment to close
    held: AckHandle,
    watchdog: StallWatchdog,
    rotate_size: u64,
    measure: SizeMeasure,
    flush_every: usize,
    size_check_every: usize,
    since_flush: usize,
    since_size_check: usize,
    metrics: Arc<WriterMetrics>,
    write_errors: RateLimitedLogger,
}

impl SegmentWriter {
    /// Open the first segment
    ///
    /// Failing to open it is fatal: nothing downstream would work either.
    pub async fn start(
        config: &SegmentConfig,
        queue: QueueReceiver,
        launcher: Arc<dyn SinkLauncher>,
        jobs: JobSender,
        acks: AckTracker,
    ) -> Result<Self> {
        let metrics = Arc::new(WriterMetrics::new());
        let mut coordinator = RotationCoordinator::new(
            SegmentLayout::from_config(config),
            launcher,
            jobs,
            config.open_retry_interval,
            acks.clone(),
            Arc::clone(&metrics),
        );
        let active = coordinator.open_first().await?;

        tracing::info!(
            segment = %active.path().display(),
            rotate_size = config.rotate_size,
            ring_size = coordinator.layout().ring_size(),
            measure = ?config.measure,
            ack = ?config.ack,
            "segment writer started"
        );

        Ok(Self {
            queue,
            coordinator,
            active: Some(active),
            acks,
            ack_mode: config.ack,
            held: AckHandle::none(),
            watchdog: StallWatchdog::new(config.stall_timeout),
            rotate_size: config.rotate_size,
            measure: config.measure,
            flush_every: config.flush_every,
            size_check_every: config.size_check_every.max(1),
            since_flush: 0,
            since_size_check: 0,
            metrics,
            write_errors: RateLimitedLogger::default(),
        })
    }

    pub fn metrics_handle(&self) -> Arc<WriterMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Write records until the queue closes or `cancel` fires, then close
    ///
    /// Records already queued are still written before the final segment is
    /// retired.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.queue.dequeue() => next,
            };

            match next {
                Dequeued::Item(item) => self.process(item, &cancel).await,
                Dequeued::Timeout => self.idle().await,
                Dequeued::Closed => break,
            }
        }

        self.close(&cancel).await;
    }

    async fn process(&mut self, item: QueueItem, cancel: &CancellationToken) {
        let QueueItem { record, ack } = item;

        // Once cancelled, a missing segment stays missing
        if self.active.is_none() && !cancel.is_cancelled() {
            self.active = self.coordinator.open_next(cancel).await;
        }
        let Some(active) = self.active.as_mut() else {
            self.metrics.record_dropped();
            self.acks.drop_unfired(ack);
            return;
        };

        match active.append(&record).await {
            Ok(bytes) => {
                self.metrics.record_written(bytes);
                self.watchdog.record_write(Instant::now());
            }
            Err(e) => {
                self.metrics.record_write_error();
                self.write_errors
                    .error("failed to write record to segment sink", &e);
            }
        }

        match self.ack_mode {
            AckMode::Handoff => self.acks.fire(ack),
            AckMode::SegmentClosed => self.held.merge(ack),
        }

        self.since_flush += 1;
        if self.flush_every > 0 && self.since_flush >= self.flush_every {
            self.flush().await;
        }

        if let Some(reason) = self.should_rotate().await {
            self.rotate(reason, cancel).await;
        }
    }

    /// Nothing arrived within the dequeue timeout
    async fn idle(&mut self) {
        if self.since_flush > 0 {
            self.flush().await;
        }
        if self.watchdog.check(Instant::now()) {
            self.metrics.record_stall();
        }
    }

    async fn flush(&mut self) {
        self.since_flush = 0;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        match active.flush().await {
            Ok(()) => self.metrics.record_flush(),
            Err(e) => {
                self.metrics.record_write_error();
                self.write_errors.error("failed to flush segment sink", &e);
            }
        }
    }

    async fn should_rotate(&mut self) -> Option<RotationReason> {
        // The segment borrow must end before awaiting; sinks are not Sync
        let on_disk = {
            let active = self.active.as_ref()?;
            if active.is_failed() {
                return Some(RotationReason::SinkFailed);
            }

            self.since_size_check += 1;
            if self.since_size_check < self.size_check_every {
                return None;
            }
            self.since_size_check = 0;

            match self.measure {
                SizeMeasure::Written => {
                    return (active.written() >= self.rotate_size)
                        .then_some(RotationReason::Size);
                }
                SizeMeasure::OnDisk => active.on_disk_size(),
            }
        };
        (on_disk.await >= self.rotate_size).then_some(RotationReason::Size)
    }

    async fn rotate(&mut self, reason: RotationReason, cancel: &CancellationToken) {
        let Some(old) = self.active.take() else {
            return;
        };
        self.metrics.record_rotation();
        self.since_flush = 0;
        self.since_size_check = 0;

        let held = self.held.take();
        self.active = self.coordinator.rotate(old, held, reason, cancel).await;
    }

    /// Drain what is left in the queue and retire the last segment
    async fn close(mut self, cancel: &CancellationToken) {
        self.queue.close();
        let mut drained = 0usize;
        while let Some(item) = self.queue.try_dequeue() {
            self.process(item, cancel).await;
            drained += 1;
        }

        let held = self.held.take();
        match self.active.take() {
            Some(last) => {
                self.coordinator
                    .retire(last, held, RotationReason::Shutdown)
                    .await
            }
            None => self.acks.drop_unfired(held),
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            drained,
            records = snapshot.records,
            bytes = snapshot.bytes,
            rotations = snapshot.rotations,
            write_errors = snapshot.write_errors,
            records_dropped = snapshot.records_dropped,
            "segment writer stopped"
        );
    }
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("active", &self.active)
            .field("ack_mode", &self.ack_mode)
            .field("held", &self.held.len())
            .field("rotate_size", &self.rotate_size)
            .field("measure", &self.measure)
            .finish()
    }
}

#[cfg(test)]
#[path = "writer_test.rs"]
mod writer_test;
