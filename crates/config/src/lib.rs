//! capline configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! An empty file is valid: TCP source on port 5170, segments under
//! `captures/` written through `json2pcap.py`, no analysis.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use capline_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[segment]\nring_size = 6").unwrap();
//! assert_eq!(config.segment.ring_size, 6);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [source]
//! type = "file"
//! path = "/data/packets.ndjson"
//!
//! [segment]
//! dir = "/captures"
//! rotate_size = 2097152
//!
//! [analysis]
//! program = "snort"
//! args = ["-c", "/etc/snort/snort.lua", "-A", "alert_json", "-l", "/alerts", "-r", "{input}"]
//! output = "/alerts/alert_json.txt"
//!
//! [results.store]
//! path = "/data/alerts.jsonl"
//! ```

mod analysis;
mod error;
mod global;
mod ingest;
mod logging;
mod metrics;
mod results;
mod segment;
mod sources;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use analysis::{
    AfterRead, AnalysisConfig, INPUT_PLACEHOLDER, OutputFormat, RESULT_PLACEHOLDER,
    SEGMENT_PLACEHOLDER,
};
pub use error::{ConfigError, Result};
pub use global::GlobalConfig;
pub use ingest::{DecodeConfig, QueueConfig};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use metrics::{MetricsConfig, MetricsFormat};
pub use results::{ArchiveConfig, PublishConfig, ResultsConfig, StoreConfig};
pub use segment::{
    AckMode, OUTPUT_PLACEHOLDER, ProcessSinkConfig, SegmentConfig, SegmentSinkConfig,
    SizeMeasure,
};
pub use sources::{DEFAULT_MAX_LINE_SIZE, FileSourceConfig, SourceConfig, TcpSourceConfig};
pub use validation::MIN_ROTATE_SIZE;

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process-wide settings (shutdown timeout)
    pub global: GlobalConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// Metrics reporting configuration
    pub metrics: MetricsConfig,

    /// Upstream message source
    pub source: SourceConfig,

    /// Payload decoding and framing
    pub decode: DecodeConfig,

    /// Ingestion queue
    pub queue: QueueConfig,

    /// Segment writer and rotation
    pub segment: SegmentConfig,

    /// Per-segment analysis tool; segments are kept on disk when absent
    pub analysis: Option<AnalysisConfig>,

    /// Downstream result sinks
    pub results: ResultsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML, or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    ///
    /// Prefer using the `FromStr` trait implementation.
    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.queue.capacity, 100_000);
        assert_eq!(config.segment.ring_size, 10);
        assert_eq!(config.source.kind(), "tcp");
        assert!(config.analysis.is_none());
        assert!(config.results.enabled().is_empty());
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[global]
shutdown_timeout = "10s"

[log]
level = "debug"
format = "json"

[metrics]
interval = "15s"

[source]
type = "file"
path = "/data/packets.ndjson"
follow = false

[decode]
field = "_source"

[queue]
capacity = 5000
enqueue_timeout = "50ms"

[segment]
dir = "/captures"
rotate_size = 1048576
ring_size = 6
flush_every = 10
stall_timeout = "30s"

[segment.sink]
type = "process"
program = "python3"
args = ["json2pcap.py", "-i", "-o", "{output}"]

[analysis]
program = "snort"
args = ["-A", "alert_json", "-r", "{input}"]
output = "/alerts/alert_json.txt"
timeout = "10m"

[results.publish]
target = "127.0.0.1:6000"

[results.store]
path = "/data/alerts.jsonl"
"#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.global.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.metrics.interval, Duration::from_secs(15));
        assert_eq!(config.queue.capacity, 5000);
        assert_eq!(config.queue.enqueue_timeout, Duration::from_millis(50));
        assert_eq!(config.segment.dir, PathBuf::from("/captures"));
        assert_eq!(config.segment.ring_size, 6);
        let analysis = config.analysis.unwrap();
        assert_eq!(analysis.program, "snort");
        assert_eq!(analysis.timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.results.enabled(), vec!["publish", "store"]);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_str("[segment\nring_size = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[segment]\nflush_every = 7").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.segment.flush_every, 7);
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/nonexistent/capline.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }
}
