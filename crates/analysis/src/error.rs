//! Analysis and result sink error types

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors raised while analysing a segment
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The tool could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The tool exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: ExitStatus,
        /// Last stderr lines
        stderr: String,
    },

    /// The tool ran past its timeout and was killed
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// Reading or clearing the output file failed
    #[error("output file {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output file is not readable as CSV
    #[error("output file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: ::csv::Error,
    },

    /// Waiting on the tool failed
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl AnalysisError {
    /// Create an Output error
    pub fn output(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Output {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by downstream result sinks
#[derive(Debug, Error)]
pub enum ResultSinkError {
    /// Could not reach the downstream target
    #[error("connection to {target} failed: {source}")]
    ConnectionFailed {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Sending failed after all retries
    #[error("send failed after {attempts} attempts: {message}")]
    SendFailed { attempts: usize, message: String },

    /// Store file could not be opened or written
    #[error("store {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Other IO failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ResultSinkError {
    /// Create a Store error
    pub fn store(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }
}
