//! Per-segment analysis configuration
//!
//! The analysis tool runs once per completed segment. Its findings are read
//! from an output file afterwards.
//!
//! # Example (signature detection)
//!
//! ```toml
//! [analysis]
//! program = "snort"
//! args = ["-c", "/etc/snort/snort.lua", "-A", "alert_json", "-l", "/alerts", "-k", "none", "-r", "{input}"]
//! output = "/alerts/alert_json.txt"
//! format = "json_lines"
//! after_read = "truncate"
//! ```
//!
//! # Example (flow features)
//!
//! ```toml
//! [analysis]
//! program = "/opt/cfm/launch_cfm.sh"
//! args = ["{input}", "{output}"]
//! output = "/tmp/flows_{segment}.csv"
//! format = "csv"
//! after_read = "delete"
//! workers = 2
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Placeholder replaced by the segment path
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Placeholder replaced by the resolved output path
pub const RESULT_PLACEHOLDER: &str = "{output}";

/// Placeholder replaced by the segment file stem inside the output path
pub const SEGMENT_PLACEHOLDER: &str = "{segment}";

/// Shape of the tool's output file
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One JSON document per line
    #[default]
    JsonLines,
    /// Header line followed by comma-separated rows
    Csv,
}

/// What happens to the output file after it was read
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AfterRead {
    /// Keep the file, empty it (for tools that append)
    #[default]
    Truncate,
    /// Remove the file
    Delete,
}

/// Analysis configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Program to run per segment
    /// Required
    pub program: String,

    /// Arguments, supports `{input}` and `{output}`
    /// Default: ["{input}"]
    pub args: Vec<String>,

    /// Output file written by the tool, may contain `{segment}`
    /// Required
    pub output: PathBuf,

    /// Output format (json_lines, csv)
    /// Default: json_lines
    pub format: OutputFormat,

    /// Output handling after read (truncate, delete)
    /// Default: truncate
    pub after_read: AfterRead,

    /// Kill the tool if it runs longer than this
    /// Default: none
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Concurrent analysis workers
    /// Default: 1
    pub workers: usize,

    /// Completed segments waiting for a worker before rotation blocks
    /// Default: 4
    pub queue_size: usize,

    /// Leave analysed segments on disk instead of deleting them
    /// Default: false
    pub keep_segments: bool,

    /// Working directory for the tool
    /// Default: inherited
    pub working_dir: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: vec![INPUT_PLACEHOLDER.into()],
            output: PathBuf::new(),
            format: OutputFormat::JsonLines,
            after_read: AfterRead::Truncate,
            timeout: None,
            workers: 1,
            queue_size: 4,
            keep_segments: false,
            working_dir: None,
        }
    }
}
