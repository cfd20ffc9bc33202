//! Upstream-consuming actor
//!
//! Polls a [`MessageSource`], unwraps each payload and turns it into queued
//! records:
//!
//! ```text
//! poll ──► PayloadDecoder ──► Record (framer idle) ─────────────► enqueue
//!                         ├─► Record (framer busy) ─┐
//!                         ├─► Text ─────────────────┴► RecordFramer ─► enqueue
//!                         └─► Empty ──► ack now
//! ```
//!
//! Framing state is kept per partition, so interleaved connections never mix
//! partial objects. A message whose bytes are still part of an unfinished
//! object keeps its acknowledgment pending; once the object completes, the
//! pending acknowledgments ride on the last frame it produced. A message that
//! yields nothing while its framer is idle (noise, malformed objects) is
//! acknowledged immediately so the upstream never stalls on bad input.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use capline_config::DecodeConfig;
use capline_framing::{Decoded, FramerStats, PayloadDecoder, RecordFramer};
use capline_sources::{Message, MessageSource};

use crate::ack::{AckHandle, AckTracker};
use crate::error::{AckError, QueueError};
use crate::metrics::IngestMetrics;
use crate::queue::{QueueItem, QueueSender};
use crate::rate_limited::RateLimitedLogger;

/// Upper bound for one poll, so cancellation is noticed promptly
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Delay after a failed poll
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Framer and held acknowledgments of one partition with a partial object
struct PartitionState {
    framer: RecordFramer,
    pending: AckHandle,
    /// Framer stats already reported
    reported: FramerStats,
}

impl PartitionState {
    fn new(max_frame_size: usize) -> Self {
        Self {
            framer: RecordFramer::with_max_frame_size(max_frame_size),
            pending: AckHandle::none(),
            reported: FramerStats::default(),
        }
    }
}

/// Feeds one source into the ingestion queue
pub struct Ingestor<S> {
    source: S,
    decoder: PayloadDecoder,
    queue: QueueSender,
    /// Only partitions with a partial object have an entry
    partitions: HashMap<u64, PartitionState>,
    max_frame_size: usize,
    checkpoint_interval: Duration,
    poll_timeout: Duration,
    retry_delay: Duration,
    acks: AckTracker,
    metrics: Arc<IngestMetrics>,
    poll_errors: RateLimitedLogger,
}

impl<S: MessageSource> Ingestor<S> {
    pub fn new(source: S, queue: QueueSender, config: &DecodeConfig, acks: AckTracker) -> Self {
        Self {
            source,
            decoder: PayloadDecoder::new(config.field.clone(), config.rewrap),
            queue,
            partitions: HashMap::new(),
            max_frame_size: config.max_frame_size,
            checkpoint_interval: config.checkpoint_interval,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            acks,
            metrics: Arc::new(IngestMetrics::new()),
            poll_errors: RateLimitedLogger::default(),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn metrics_handle(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Consume until cancelled, the source is exhausted or the queue closes
    ///
    /// Returns the source so the caller can checkpoint it once more after
    /// late acknowledgments have fired.
    pub async fn run(mut self, cancel: CancellationToken) -> S {
        tracing::info!(source = self.source.id(), "ingestion started");
        let mut last_checkpoint = Instant::now();

        while !cancel.is_cancelled() {
            if self.source.is_exhausted() {
                tracing::info!(source = self.source.id(), "source exhausted");
                break;
            }

            match self.source.poll(self.poll_timeout).await {
                Ok(Some(message)) => match self.handle(message, &cancel).await {
                    Ok(()) => {}
                    Err(QueueError::Cancelled) => break,
                    Err(QueueError::Closed) => {
                        tracing::error!(
                            source = self.source.id(),
                            "segment writer stopped, ingestion cannot continue"
                        );
                        break;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_poll_error();
                    self.poll_errors.error("upstream poll failed", &e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }

            if last_checkpoint.elapsed() >= self.checkpoint_interval {
                self.checkpoint().await;
                last_checkpoint = Instant::now();
            }
        }

        // Partial objects never completed; leave their messages uncommitted
        for (partition, state) in self.partitions.drain() {
            if !state.pending.is_empty() {
                tracing::debug!(
                    partition,
                    pending_bytes = state.framer.pending_bytes(),
                    "discarding partial object at shutdown"
                );
            }
            self.acks.drop_unfired(state.pending);
        }
        self.checkpoint().await;

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            source = self.source.id(),
            messages = snapshot.messages,
            records_decoded = snapshot.records_decoded,
            frames = snapshot.frames,
            acked_immediately = snapshot.acked_immediately,
            poll_errors = snapshot.poll_errors,
            "ingestion stopped"
        );
        self.source
    }

    async fn checkpoint(&mut self) {
        if let Err(e) = self.source.checkpoint().await {
            self.metrics.record_checkpoint_error();
            tracing::warn!(source = self.source.id(), error = %e, "checkpoint failed");
        }
    }

    /// Decode one message and enqueue whatever records it completes
    async fn handle(&mut self, message: Message, cancel: &CancellationToken) -> Result<(), QueueError> {
        self.metrics.record_message(message.payload().len());
        let partition = message.partition();
        let ack = message_ack(&message);

        match self.decoder.decode(message.payload()) {
            Decoded::Empty => {
                self.metrics.record_acked_immediately();
                self.acks.fire(ack);
                Ok(())
            }
            Decoded::Record(record) if !self.partitions.contains_key(&partition) => {
                self.metrics.record_decoded();
                self.queue.enqueue(QueueItem::new(record, ack), cancel).await
            }
            // Keep partition order behind the unfinished object
            Decoded::Record(record) => {
                let text = record.to_string();
                self.feed(partition, text.as_bytes(), ack, cancel).await
            }
            Decoded::Text(text) => self.feed(partition, text.as_bytes(), ack, cancel).await,
        }
    }

    async fn feed(
        &mut self,
        partition: u64,
        chunk: &[u8],
        current: AckHandle,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        let mut state = self
            .partitions
            .remove(&partition)
            .unwrap_or_else(|| PartitionState::new(self.max_frame_size));

        let previous = state.pending.take();
        let frames = state.framer.push(chunk);
        let idle = state.framer.is_idle();

        let stats = state.framer.stats();
        self.metrics.record_discarded(
            stats.malformed - state.reported.malformed,
            stats.oversized - state.reported.oversized,
        );
        state.reported = stats;

        if frames.is_empty() {
            let mut held = previous;
            held.merge(current);
            if idle {
                self.metrics.record_acked_immediately();
                self.acks.fire(held);
            } else {
                state.pending = held;
                self.partitions.insert(partition, state);
            }
            return Ok(());
        }

        // The current message also started the next partial object
        let mut tail = previous;
        if idle {
            tail.merge(current);
        } else {
            state.pending = current;
            self.partitions.insert(partition, state);
        }

        self.metrics.record_frames(frames.len());
        let last = frames.len() - 1;
        for (i, frame) in frames.into_iter().enumerate() {
            let ack = if i == last {
                std::mem::take(&mut tail)
            } else {
                AckHandle::none()
            };
            if let Err(e) = self
                .queue
                .enqueue(QueueItem::new(frame.into_value(), ack), cancel)
                .await
            {
                self.acks.drop_unfired(tail);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Acknowledgment that commits `message` upstream
fn message_ack(message: &Message) -> AckHandle {
    let commit = message.commit_handle();
    AckHandle::new(move || commit.commit().map(|_| ()).map_err(AckError::commit))
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod ingest_test;
