//! Upstream source configuration
//!
//! Exactly one upstream source feeds the pipeline. The `type` key selects it.
//!
//! ```toml
//! [source]
//! type = "file"
//! path = "/data/packets.ndjson"
//! follow = true
//! ```
//!
//! ```toml
//! [source]
//! type = "tcp"
//! port = 5170
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default maximum line size accepted from a source (16 MiB)
pub const DEFAULT_MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

/// Upstream source selection
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Newline-delimited file with a persisted commit offset
    File(FileSourceConfig),
    /// Newline-delimited TCP listener
    Tcp(TcpSourceConfig),
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Tcp(TcpSourceConfig::default())
    }
}

impl SourceConfig {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Tcp(_) => "tcp",
        }
    }
}

/// File source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileSourceConfig {
    /// File to read, one message per line
    /// Required
    pub path: PathBuf,

    /// Where the committed byte offset is persisted
    /// Default: `<path>.offset`
    pub checkpoint: Option<PathBuf>,

    /// Keep reading as the file grows instead of stopping at EOF
    /// Default: true
    pub follow: bool,

    /// How long to wait before re-reading after EOF
    /// Default: 250ms
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Longest accepted line; longer lines are skipped
    /// Default: 16 MiB
    pub max_line_size: usize,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            checkpoint: None,
            follow: true,
            poll_interval: Duration::from_millis(250),
            max_line_size: DEFAULT_MAX_LINE_SIZE,
        }
    }
}

impl FileSourceConfig {
    /// Resolved checkpoint path
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint.clone().unwrap_or_else(|| {
            let mut name = self.path.clone().into_os_string();
            name.push(".offset");
            PathBuf::from(name)
        })
    }
}

/// TCP source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpSourceConfig {
    /// Bind address
    /// Default: 0.0.0.0
    pub address: String,

    /// Listen port
    /// Default: 5170
    pub port: u16,

    /// Longest accepted line; longer lines are skipped
    /// Default: 16 MiB
    pub max_line_size: usize,

    /// Lines buffered between connection handlers and the ingest loop
    /// Default: 10000
    pub channel_capacity: usize,

    /// Set TCP_NODELAY on accepted connections
    /// Default: true
    pub nodelay: bool,
}

impl Default for TcpSourceConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: 5170,
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            channel_capacity: 10_000,
            nodelay: true,
        }
    }
}

impl TcpSourceConfig {
    /// Socket address string (`address:port`)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
