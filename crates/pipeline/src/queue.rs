//! Bounded ingestion queue
//!
//! Decouples the upstream-consuming actor from the segment writer. Enqueue
//! never drops: while the queue is full it retries in `enqueue_timeout`
//! slices, so a slow writer back-pressures the upstream poll loop and, through
//! withheld acknowledgments, the upstream commit cadence. Dequeue waits at
//! most `dequeue_timeout` so the writer can run its stall check.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use capline_config::QueueConfig;

use crate::ack::AckHandle;
use crate::error::QueueError;
use crate::metrics::QueueMetrics;
use crate::rate_limited::RateLimitedLogger;

/// One record and the acknowledgments riding on it
#[derive(Debug)]
pub struct QueueItem {
    pub record: Value,
    pub ack: AckHandle,
}

impl QueueItem {
    pub fn new(record: Value, ack: AckHandle) -> Self {
        Self { record, ack }
    }

    /// Record with nothing to acknowledge
    pub fn unacked(record: Value) -> Self {
        Self::new(record, AckHandle::none())
    }
}

/// Result of one dequeue attempt
#[derive(Debug)]
pub enum Dequeued {
    Item(QueueItem),
    /// Nothing arrived within the dequeue timeout
    Timeout,
    /// Every sender is gone and the queue is drained
    Closed,
}

/// Create a queue from configuration
pub fn channel(config: &QueueConfig) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let metrics = Arc::new(QueueMetrics::new());
    let sender = QueueSender {
        tx,
        enqueue_timeout: config.enqueue_timeout,
        metrics: Arc::clone(&metrics),
        full: Arc::new(RateLimitedLogger::default()),
    };
    let receiver = QueueReceiver {
        rx,
        dequeue_timeout: config.dequeue_timeout,
        metrics,
    };
    (sender, receiver)
}

/// Producer side, held by the ingestion actor
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<QueueItem>,
    enqueue_timeout: Duration,
    metrics: Arc<QueueMetrics>,
    full: Arc<RateLimitedLogger>,
}

impl QueueSender {
    /// Insert `item`, retrying while the queue is full
    ///
    /// Gives up only when the writer is gone or `cancel` fires; the item
    /// (and its unfired acknowledgments) is then dropped.
    pub async fn enqueue(
        &self,
        mut item: QueueItem,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        loop {
            match self.tx.send_timeout(item, self.enqueue_timeout).await {
                Ok(()) => {
                    self.metrics.record_enqueued();
                    return Ok(());
                }
                Err(SendTimeoutError::Timeout(back)) => {
                    self.metrics.record_full_retry();
                    self.full
                        .warn("ingestion queue full, retrying", &self.tx.max_capacity());
                    if cancel.is_cancelled() {
                        return Err(QueueError::Cancelled);
                    }
                    item = back;
                }
                Err(SendTimeoutError::Closed(_)) => return Err(QueueError::Closed),
            }
        }
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics_handle(&self) -> Arc<QueueMetrics> {
        Arc::clone(&self.metrics)
    }
}

/// Consumer side, owned by the segment writer
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<QueueItem>,
    dequeue_timeout: Duration,
    metrics: Arc<QueueMetrics>,
}

impl QueueReceiver {
    /// Wait up to the dequeue timeout for the next item
    pub async fn dequeue(&mut self) -> Dequeued {
        match tokio::time::timeout(self.dequeue_timeout, self.rx.recv()).await {
            Ok(Some(item)) => {
                self.metrics.record_dequeued();
                Dequeued::Item(item)
            }
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::Timeout,
        }
    }

    /// Next item if one is already queued
    pub fn try_dequeue(&mut self) -> Option<QueueItem> {
        let item = self.rx.try_recv().ok()?;
        self.metrics.record_dequeued();
        Some(item)
    }

    /// Refuse further enqueues; items already queued stay readable
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn metrics_handle(&self) -> Arc<QueueMetrics> {
        Arc::clone(&self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(capacity: usize) -> QueueConfig {
        QueueConfig {
            capacity,
            enqueue_timeout: Duration::from_millis(10),
            dequeue_timeout: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = channel(&config(16));
        let cancel = CancellationToken::new();
        for i in 0..10 {
            tx.enqueue(QueueItem::unacked(json!({"seq": i})), &cancel)
                .await
                .unwrap();
        }
        assert_eq!(tx.len(), 10);

        for i in 0..10 {
            let Dequeued::Item(item) = rx.dequeue().await else {
                panic!("expected item {i}");
            };
            assert_eq!(item.record["seq"], i);
        }
        assert!(matches!(rx.dequeue().await, Dequeued::Timeout));
    }

    #[tokio::test]
    async fn test_full_queue_retries_until_space() {
        let (tx, mut rx) = channel(&config(1));
        let cancel = CancellationToken::new();
        tx.enqueue(QueueItem::unacked(json!(1)), &cancel).await.unwrap();

        let producer = {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.enqueue(QueueItem::unacked(json!(2)), &cancel).await })
        };

        // Let the producer spin on a full queue for a few slices
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());

        assert!(matches!(rx.dequeue().await, Dequeued::Item(_)));
        producer.await.unwrap().unwrap();

        let Dequeued::Item(item) = rx.dequeue().await else {
            panic!("expected second item");
        };
        assert_eq!(item.record, json!(2));
        assert!(tx.metrics_handle().snapshot().full_retries > 0);
    }

    #[tokio::test]
    async fn test_cancel_abandons_full_enqueue() {
        let (tx, _rx) = channel(&config(1));
        let cancel = CancellationToken::new();
        tx.enqueue(QueueItem::unacked(json!(1)), &cancel).await.unwrap();

        cancel.cancel();
        let err = tx
            .enqueue(QueueItem::unacked(json!(2)), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Cancelled);
    }

    #[tokio::test]
    async fn test_closed_after_senders_dropped() {
        let (tx, mut rx) = channel(&config(4));
        tx.enqueue(QueueItem::unacked(json!(1)), &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);

        assert!(matches!(rx.dequeue().await, Dequeued::Item(_)));
        assert!(matches!(rx.dequeue().await, Dequeued::Closed));
    }

    #[tokio::test]
    async fn test_close_keeps_queued_items() {
        let (tx, mut rx) = channel(&config(4));
        let cancel = CancellationToken::new();
        tx.enqueue(QueueItem::unacked(json!(1)), &cancel).await.unwrap();

        rx.close();
        assert_eq!(
            tx.enqueue(QueueItem::unacked(json!(2)), &cancel).await,
            Err(QueueError::Closed)
        );
        assert!(rx.try_dequeue().is_some());
        assert!(rx.try_dequeue().is_none());
    }
}
