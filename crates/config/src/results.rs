//! Downstream result sinks
//!
//! Every configured sink receives every analysis report.
//!
//! # Example
//!
//! ```toml
//! [results.publish]
//! target = "collector.internal:6000"
//!
//! [results.store]
//! path = "/data/alerts.jsonl"
//! unique_keys = ["timestamp", "msg", "src_ap"]
//!
//! [results.archive]
//! dir = "/data/flows"
//! prefix = "flow_global"
//! extension = "csv"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// All result sinks
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Republish result lines over TCP
    pub publish: Option<PublishConfig>,

    /// Persist documents with unique-key deduplication
    pub store: Option<StoreConfig>,

    /// Append result lines to a small ring of rotated files
    pub archive: Option<ArchiveConfig>,
}

impl ResultsConfig {
    /// Names of configured sinks
    pub fn enabled(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.publish.is_some() {
            names.push("publish");
        }
        if self.store.is_some() {
            names.push("store");
        }
        if self.archive.is_some() {
            names.push("archive");
        }
        names
    }
}

/// Newline-delimited TCP republisher
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Target address (host:port)
    /// Required
    pub target: String,

    /// Connection timeout
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Attempts per line before it is counted as failed
    /// Default: 3
    pub retry_attempts: usize,

    /// Wait between attempts
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Enable TCP keep-alive
    /// Default: true
    pub tcp_keepalive: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            connection_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_interval: Duration::from_secs(1),
            tcp_keepalive: true,
        }
    }
}

/// Deduplicating document store
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSONL file holding stored documents
    /// Required
    pub path: PathBuf,

    /// Fields forming the unique key; `_id` is used when the list is empty
    /// Default: ["timestamp", "msg", "src_ap"]
    pub unique_keys: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            unique_keys: vec!["timestamp".into(), "msg".into(), "src_ap".into()],
        }
    }
}

/// Rotating result archive
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory for archive files
    /// Required
    pub dir: PathBuf,

    /// File name prefix
    /// Default: results
    pub prefix: String,

    /// File extension
    /// Default: csv
    pub extension: String,

    /// Rotate once a file reaches this many bytes
    /// Default: 50 KiB
    pub max_size: u64,

    /// Number of archive files in the ring
    /// Default: 6
    pub ring_size: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            prefix: "results".into(),
            extension: "csv".into(),
            max_size: 50 * 1024,
            ring_size: 6,
        }
    }
}
