//! Decode and queue configuration
//!
//! Controls how upstream payloads are unwrapped into packet records and how
//! the bounded ingestion queue applies backpressure.

use std::time::Duration;

use serde::Deserialize;

/// Payload decoding configuration
///
/// # Example
///
/// ```toml
/// [decode]
/// field = "_source"
/// rewrap = true
/// max_frame_size = 16777216
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Payload field holding the packet record (object or string-encoded JSON)
    /// Default: "_source"
    pub field: String,

    /// Re-wrap the unwrapped record under `field` before queueing
    /// Default: true
    pub rewrap: bool,

    /// Largest object the framer will buffer before discarding it
    /// Default: 16 MiB
    pub max_frame_size: usize,

    /// How often the source commit checkpoint is persisted
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub checkpoint_interval: Duration,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            field: "_source".into(),
            rewrap: true,
            max_frame_size: 16 * 1024 * 1024,
            checkpoint_interval: Duration::from_secs(5),
        }
    }
}

/// Ingestion queue configuration
///
/// # Example
///
/// ```toml
/// [queue]
/// capacity = 100000
/// enqueue_timeout = "100ms"
/// dequeue_timeout = "1s"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued records
    /// Default: 100000
    pub capacity: usize,

    /// Length of one enqueue attempt while the queue is full
    /// Default: 100ms
    #[serde(with = "humantime_serde")]
    pub enqueue_timeout: Duration,

    /// How long the writer waits for an item before checking the stall watchdog
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub dequeue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            enqueue_timeout: Duration::from_millis(100),
            dequeue_timeout: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, 100_000);
        assert_eq!(config.enqueue_timeout, Duration::from_millis(100));
        assert_eq!(config.dequeue_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_decode_partial() {
        let config: DecodeConfig = toml::from_str("field = \"layers\"\nrewrap = false").unwrap();
        assert_eq!(config.field, "layers");
        assert!(!config.rewrap);
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);
    }
}
