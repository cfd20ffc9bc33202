//! capline sources
//!
//! Upstream sources deliver opaque payloads with an explicit-commit
//! acknowledgment model. The pipeline polls, processes, and commits each
//! message once its content has been handed to a segment (or dropped as
//! unparseable).
//!
//! # Available Sources
//!
//! - **File** - newline-delimited file, optionally followed, with a persisted
//!   contiguous commit offset
//! - **TCP** - newline-delimited TCP listener, one partition per connection
//!
//! # Example
//!
//! ```ignore
//! use capline_sources::{FileSource, MessageSource};
//!
//! let mut source = FileSource::open(&config).await?;
//! while let Some(message) = source.poll(Duration::from_secs(1)).await? {
//!     process(message.payload());
//!     message.commit()?;
//! }
//! source.checkpoint().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

mod common;
mod error;
pub mod file;
mod message;
pub mod tcp;

pub use common::{SourceMetrics, SourceMetricsSnapshot};
pub use error::{Result, SourceError};
pub use file::{FileSource, OffsetTracker};
pub use message::{CommitHandle, Committer, Message, OffsetRange};
pub use tcp::TcpLineSource;

/// An ordered stream of upstream messages
#[async_trait]
pub trait MessageSource: Send {
    /// Identifier used in logs
    fn id(&self) -> &str;

    /// Wait up to `timeout` for the next message
    ///
    /// `Ok(None)` means nothing arrived in time (or the source is exhausted,
    /// see [`MessageSource::is_exhausted`]).
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>>;

    /// Persist commit progress, if the source supports it
    async fn checkpoint(&mut self) -> Result<()> {
        Ok(())
    }

    /// True once the source will never deliver another message
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Shared metrics for reporting
    fn metrics_handle(&self) -> Arc<SourceMetrics>;
}

#[async_trait]
impl MessageSource for Box<dyn MessageSource> {
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        (**self).poll(timeout).await
    }

    async fn checkpoint(&mut self) -> Result<()> {
        (**self).checkpoint().await
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }

    fn metrics_handle(&self) -> Arc<SourceMetrics> {
        (**self).metrics_handle()
    }
}
