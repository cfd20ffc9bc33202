//! capline pipeline
//!
//! Moves packet records from an upstream source into rotated capture
//! segments and hands each completed segment to analysis.
//!
//! # Architecture
//!
//! ```text
//! [Source]        [Ingestor]           [Queue]           [SegmentWriter]          [Pool]
//!  poll ──► decode ─► frame ──► enqueue ──► bounded ──► dequeue ─► append ─┐
//!                                  ▲        FIFO                            │
//!                                  │                         rotate ◄───────┘
//!  commit ◄── AckHandle ◄──────────┴──── fire on hand-off      │
//!                                                              ├─► close task
//!                                                              └─► AnalysisJob ─► analyze
//!                                                                                  dispatch
//!                                                                                  delete
//! ```
//!
//! # Key Design
//!
//! - **One writer**: only [`SegmentWriter`] touches the active segment, so it
//!   needs no locking
//! - **Backpressure, not loss**: a full queue makes the ingestor retry, and a
//!   full analysis queue makes rotation wait
//! - **Exactly-once acknowledgment**: [`AckHandle`] callbacks are consumed
//!   when fired
//! - **Safe ring reuse**: a slot is reopened only after its previous
//!   occupant's analysis finished with the file
//!
//! # Example
//!
//! ```ignore
//! use capline_pipeline::{AckTracker, AnalysisPool, Ingestor, SegmentWriter};
//!
//! let acks = AckTracker::new();
//! let (tx, rx) = capline_pipeline::queue::channel(&config.queue);
//! let (pool, jobs) = AnalysisPool::start(trigger, dispatcher, settings);
//! let launcher = capline_pipeline::launcher_from_config(&config.segment);
//!
//! let writer = SegmentWriter::start(&config.segment, rx, launcher, jobs, acks.clone()).await?;
//! let ingestor = Ingestor::new(source, tx, &config.decode, acks);
//!
//! tokio::spawn(writer.run(cancel.clone()));
//! let source = ingestor.run(cancel).await;
//! ```

mod ack;
mod error;
pub mod ingest;
mod metrics;
pub mod pool;
pub mod queue;
mod rate_limited;
pub mod rotation;
pub mod segment;
pub mod sink;
mod watchdog;
mod writer;

pub use ack::{AckFailure, AckHandle, AckTracker};
pub use error::{AckError, PipelineError, QueueError, Result};
pub use ingest::Ingestor;
pub use metrics::{
    AckMetrics, AckMetricsSnapshot, AnalysisMetrics, AnalysisMetricsSnapshot, IngestMetrics,
    IngestMetricsSnapshot, MetricsReporter, PipelineSnapshot, QueueMetrics, QueueMetricsSnapshot,
    WriterMetrics, WriterMetricsSnapshot,
};
pub use pool::{AnalysisJob, AnalysisPool, JobSender, PoolSettings};
pub use queue::{Dequeued, QueueItem, QueueReceiver, QueueSender};
pub use rate_limited::RateLimitedLogger;
pub use rotation::{RotationCoordinator, RotationReason};
pub use segment::{ActiveSegment, SegmentLayout};
pub use sink::{FileLauncher, ProcessLauncher, SegmentSink, SinkLauncher, launcher_from_config};
pub use watchdog::StallWatchdog;
pub use writer::SegmentWriter;
