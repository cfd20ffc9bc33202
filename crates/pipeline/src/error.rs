//! Pipeline error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use capline_sources::SourceError;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The segment sink could not be started
    #[error("failed to launch sink for {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing, flushing or closing the sink input failed
    #[error("sink io for {path}: {source}")]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The sink process exited unsuccessfully
    #[error("sink for {path} exited with {status}")]
    SinkExit { path: PathBuf, status: String },

    /// Record could not be serialised
    #[error("record serialisation failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Upstream source failure
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Queue closed or enqueue abandoned
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Pipeline is shutting down
    #[error("pipeline is shutting down")]
    ShuttingDown,
}

impl PipelineError {
    /// Create a Launch error
    pub fn launch(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Launch {
            path: path.into(),
            source,
        }
    }

    /// Create a Sink error
    pub fn sink(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Sink {
            path: path.into(),
            source,
        }
    }

    /// Create a SinkExit error
    pub fn sink_exit(path: impl Into<PathBuf>, status: impl ToString) -> Self {
        Self::SinkExit {
            path: path.into(),
            status: status.to_string(),
        }
    }
}

/// Ingestion queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The writer side is gone
    #[error("queue closed")]
    Closed,

    /// Cancelled while waiting for space
    #[error("enqueue cancelled")]
    Cancelled,
}

/// Acknowledgment callback errors
#[derive(Debug, Error)]
pub enum AckError {
    /// The upstream commit failed
    #[error("commit failed: {0}")]
    Commit(String),
}

impl AckError {
    pub fn commit(message: impl ToString) -> Self {
        Self::Commit(message.to_string())
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
