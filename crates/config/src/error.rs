//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error - required field missing
    #[error("{section} is missing required field '{field}'")]
    MissingField {
        /// Config section (e.g., "source", "analysis")
        section: &'static str,
        /// Missing field name
        field: &'static str,
    },

    /// Validation error - invalid value
    #[error("{section} has invalid {field}: {message}")]
    InvalidValue {
        /// Config section
        section: &'static str,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },

    /// Validation error - a command template lacks a required placeholder
    #[error("{section}.{field} must contain the '{placeholder}' placeholder")]
    MissingPlaceholder {
        /// Config section
        section: &'static str,
        /// Field name
        field: &'static str,
        /// The placeholder that was expected
        placeholder: &'static str,
    },
}

impl ConfigError {
    /// Create a MissingField error
    pub fn missing_field(section: &'static str, field: &'static str) -> Self {
        Self::MissingField { section, field }
    }

    /// Create an InvalidValue error
    pub fn invalid_value(
        section: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            section,
            field,
            message: message.into(),
        }
    }

    /// Create a MissingPlaceholder error
    pub fn missing_placeholder(
        section: &'static str,
        field: &'static str,
        placeholder: &'static str,
    ) -> Self {
        Self::MissingPlaceholder {
            section,
            field,
            placeholder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_error() {
        let err = ConfigError::missing_field("analysis", "program");
        assert!(err.to_string().contains("analysis"));
        assert!(err.to_string().contains("program"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value("segment", "ring_size", "must be positive");
        let msg = err.to_string();
        assert!(msg.contains("segment"));
        assert!(msg.contains("ring_size"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_missing_placeholder_error() {
        let err = ConfigError::missing_placeholder("segment.sink", "args", "{output}");
        assert_eq!(
            err.to_string(),
            "segment.sink.args must contain the '{output}' placeholder"
        );
    }
}
