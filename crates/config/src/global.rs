//! Global configuration settings
//!
//! These settings apply across all components and provide sensible defaults.

use serde::Deserialize;
use std::time::Duration;

/// Global configuration that applies to all components
///
/// # Example
///
/// ```toml
/// [global]
/// shutdown_timeout = "30s"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// How long shutdown waits for each stage (ingest, writer, analysis) to drain
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
