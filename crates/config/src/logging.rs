//! Logging configuration
//!
//! Controls how capline and the external tools it drives report to the log.

use serde::Deserialize;

/// Log level
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing level filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console output (default)
    #[default]
    Console,
    /// One JSON object per event, for log shippers
    Json,
}

/// Log output destination
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Append to a file
    #[serde(untagged)]
    File(String),
}

/// Logging configuration
///
/// # Example
///
/// ```toml
/// [log]
/// level = "info"
/// format = "json"
/// output = "/var/log/capline.log"
/// # extra EnvFilter directives, e.g. quieter external tool output
/// directives = ["capline_pipeline::sink=warn"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: info
    pub level: LogLevel,

    /// Output format (console, json)
    /// Default: console
    pub format: LogFormat,

    /// Output destination (stdout, stderr, or file path)
    /// Default: stdout
    pub output: LogOutput,

    /// Additional `EnvFilter` directives appended after the level
    /// Default: none
    pub directives: Vec<String>,
}

impl LogConfig {
    /// Build the `EnvFilter` directive string
    ///
    /// `level_override` (from the command line) replaces the configured level.
    pub fn filter_directive(&self, level_override: Option<&str>) -> String {
        let mut directive = level_override
            .unwrap_or_else(|| self.level.as_str())
            .to_string();
        for extra in &self.directives {
            directive.push(',');
            directive.push_str(extra);
        }
        directive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Console);
        assert_eq!(config.output, LogOutput::Stdout);
        assert!(config.directives.is_empty());
    }

    #[test]
    fn test_deserialize_file_output() {
        let toml = r#"
level = "debug"
format = "json"
output = "/tmp/capline.log"
"#;
        let config: LogConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::File("/tmp/capline.log".into()));
    }

    #[test]
    fn test_deserialize_stderr() {
        let config: LogConfig = toml::from_str("output = \"stderr\"").unwrap();
        assert_eq!(config.output, LogOutput::Stderr);
    }

    #[test]
    fn test_filter_directive() {
        let config: LogConfig = toml::from_str(
            r#"
level = "warn"
directives = ["capline_pipeline=debug", "capline_analysis=trace"]
"#,
        )
        .unwrap();
        assert_eq!(
            config.filter_directive(None),
            "warn,capline_pipeline=debug,capline_analysis=trace"
        );
        assert_eq!(
            config.filter_directive(Some("trace")),
            "trace,capline_pipeline=debug,capline_analysis=trace"
        );
    }
}
