//! Segment writer and rotation configuration
//!
//! # Example
//!
//! ```toml
//! [segment]
//! dir = "/captures"
//! prefix = "trace"
//! extension = "pcapng"
//! rotate_size = 2097152
//! ring_size = 10
//! flush_every = 100
//! measure = "on_disk"
//! stall_timeout = "2m"
//! ack = "handoff"
//!
//! [segment.sink]
//! type = "process"
//! program = "python3"
//! args = ["json2pcap.py", "-i", "-o", "{output}"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Placeholder replaced by the segment path in sink arguments
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// How the writer learns the current segment size
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SizeMeasure {
    /// Stat the segment file (what the synthesis tool has produced so far)
    #[default]
    OnDisk,
    /// Count bytes handed to the sink
    Written,
}

/// When upstream messages are acknowledged
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// As soon as the record is handed to the sink
    #[default]
    Handoff,
    /// After the segment's sink exited successfully
    SegmentClosed,
}

/// Sink that turns a segment's JSON array into a file
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentSinkConfig {
    /// External synthesis process reading the array on stdin
    Process(ProcessSinkConfig),
    /// Write the JSON array to the segment path as-is
    File,
}

impl Default for SegmentSinkConfig {
    fn default() -> Self {
        Self::Process(ProcessSinkConfig::default())
    }
}

/// External synthesis process
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessSinkConfig {
    /// Program to run
    /// Default: python3
    pub program: String,

    /// Arguments, `{output}` is replaced by the segment path
    /// Default: ["json2pcap.py", "-i", "-o", "{output}"]
    pub args: Vec<String>,

    /// Working directory for the process
    /// Default: inherited
    pub working_dir: Option<PathBuf>,
}

impl Default for ProcessSinkConfig {
    fn default() -> Self {
        Self {
            program: "python3".into(),
            args: vec![
                "json2pcap.py".into(),
                "-i".into(),
                "-o".into(),
                OUTPUT_PLACEHOLDER.into(),
            ],
            working_dir: None,
        }
    }
}

/// Segment configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Directory holding in-flight segments
    /// Default: captures
    pub dir: PathBuf,

    /// File name prefix
    /// Default: trace
    pub prefix: String,

    /// File extension
    /// Default: pcapng
    pub extension: String,

    /// Rotate once the segment reaches this many bytes
    /// Default: 2 MiB
    pub rotate_size: u64,

    /// Number of ring slots used to name segments
    /// Default: 10
    pub ring_size: usize,

    /// Flush the sink input every N records
    /// Default: 100
    pub flush_every: usize,

    /// Size measurement (on_disk, written)
    /// Default: on_disk
    pub measure: SizeMeasure,

    /// Check the size every N records
    /// Default: 1
    pub size_check_every: usize,

    /// Warn when no record was written for this long
    /// Default: 120s
    #[serde(with = "humantime_serde")]
    pub stall_timeout: Duration,

    /// Acknowledgment point (handoff, segment_closed)
    /// Default: handoff
    pub ack: AckMode,

    /// Delay between attempts to open a new segment after a failure
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub open_retry_interval: Duration,

    /// Write buffer in front of the sink input
    /// Default: 64 KiB
    pub buffer_size: usize,

    /// Segment sink
    pub sink: SegmentSinkConfig,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("captures"),
            prefix: "trace".into(),
            extension: "pcapng".into(),
            rotate_size: 2 * 1024 * 1024,
            ring_size: 10,
            flush_every: 100,
            measure: SizeMeasure::OnDisk,
            size_check_every: 1,
            stall_timeout: Duration::from_secs(120),
            ack: AckMode::Handoff,
            open_retry_interval: Duration::from_secs(1),
            buffer_size: 64 * 1024,
            sink: SegmentSinkConfig::default(),
        }
    }
}
