//! Source error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for source operations
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors raised by upstream sources
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to bind the listener
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open the input file
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Read failure on an open source
    #[error("read error: {0}")]
    Read(#[from] io::Error),

    /// Failed to persist or load the commit checkpoint
    #[error("checkpoint {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Commit rejected by the source
    #[error("commit failed: {0}")]
    Commit(String),
}

impl SourceError {
    /// Create a Checkpoint error
    pub fn checkpoint(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Checkpoint {
            path: path.into(),
            source,
        }
    }

    /// Create a Commit error
    pub fn commit(msg: impl Into<String>) -> Self {
        Self::Commit(msg.into())
    }
}
