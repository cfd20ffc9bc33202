//! Configuration validation
//!
//! Validates config consistency:
//! - Required fields are present for configured components
//! - Sizes, counts and intervals are positive
//! - Command templates carry the placeholders they need
//! - Concurrent analysis workers do not share one output file

use std::time::Duration;

use crate::Config;
use crate::analysis::{INPUT_PLACEHOLDER, SEGMENT_PLACEHOLDER};
use crate::error::{ConfigError, Result};
use crate::segment::{OUTPUT_PLACEHOLDER, SegmentSinkConfig};
use crate::sources::SourceConfig;

/// Smallest accepted rotation threshold; must exceed a typical packet record
pub const MIN_ROTATE_SIZE: u64 = 1024;

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_global(config)?;
    validate_source(config)?;
    validate_queue(config)?;
    validate_segment(config)?;
    validate_analysis(config)?;
    validate_results(config)?;
    Ok(())
}

fn positive(section: &'static str, field: &'static str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(ConfigError::invalid_value(section, field, "must be positive"));
    }
    Ok(())
}

fn positive_duration(section: &'static str, field: &'static str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(ConfigError::invalid_value(section, field, "must be positive"));
    }
    Ok(())
}

fn validate_global(config: &Config) -> Result<()> {
    positive_duration("global", "shutdown_timeout", config.global.shutdown_timeout)?;
    if config.metrics.enabled {
        positive_duration("metrics", "interval", config.metrics.interval)?;
    }
    Ok(())
}

fn validate_source(config: &Config) -> Result<()> {
    match &config.source {
        SourceConfig::File(file) => {
            if file.path.as_os_str().is_empty() {
                return Err(ConfigError::missing_field("source", "path"));
            }
            positive("source", "max_line_size", file.max_line_size)?;
            positive_duration("source", "poll_interval", file.poll_interval)?;
        }
        SourceConfig::Tcp(tcp) => {
            if tcp.port == 0 {
                return Err(ConfigError::invalid_value("source", "port", "must be non-zero"));
            }
            positive("source", "max_line_size", tcp.max_line_size)?;
            positive("source", "channel_capacity", tcp.channel_capacity)?;
        }
    }
    if config.decode.field.is_empty() {
        return Err(ConfigError::missing_field("decode", "field"));
    }
    positive("decode", "max_frame_size", config.decode.max_frame_size)?;
    positive_duration(
        "decode",
        "checkpoint_interval",
        config.decode.checkpoint_interval,
    )?;
    Ok(())
}

fn validate_queue(config: &Config) -> Result<()> {
    positive("queue", "capacity", config.queue.capacity)?;
    positive_duration("queue", "enqueue_timeout", config.queue.enqueue_timeout)?;
    positive_duration("queue", "dequeue_timeout", config.queue.dequeue_timeout)?;
    Ok(())
}

fn validate_segment(config: &Config) -> Result<()> {
    let segment = &config.segment;
    if segment.rotate_size < MIN_ROTATE_SIZE {
        return Err(ConfigError::invalid_value(
            "segment",
            "rotate_size",
            format!("must be at least {MIN_ROTATE_SIZE} bytes"),
        ));
    }
    positive("segment", "ring_size", segment.ring_size)?;
    positive("segment", "flush_every", segment.flush_every)?;
    positive("segment", "size_check_every", segment.size_check_every)?;
    positive("segment", "buffer_size", segment.buffer_size)?;
    positive_duration("segment", "stall_timeout", segment.stall_timeout)?;
    positive_duration("segment", "open_retry_interval", segment.open_retry_interval)?;
    if segment.prefix.is_empty() {
        return Err(ConfigError::missing_field("segment", "prefix"));
    }

    if let SegmentSinkConfig::Process(process) = &segment.sink {
        if process.program.is_empty() {
            return Err(ConfigError::missing_field("segment.sink", "program"));
        }
        if !process.args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER)) {
            return Err(ConfigError::missing_placeholder(
                "segment.sink",
                "args",
                OUTPUT_PLACEHOLDER,
            ));
        }
    }
    Ok(())
}

fn validate_analysis(config: &Config) -> Result<()> {
    let Some(analysis) = &config.analysis else {
        return Ok(());
    };
    if analysis.program.is_empty() {
        return Err(ConfigError::missing_field("analysis", "program"));
    }
    if analysis.output.as_os_str().is_empty() {
        return Err(ConfigError::missing_field("analysis", "output"));
    }
    if !analysis.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
        return Err(ConfigError::missing_placeholder(
            "analysis",
            "args",
            INPUT_PLACEHOLDER,
        ));
    }
    positive("analysis", "workers", analysis.workers)?;
    positive("analysis", "queue_size", analysis.queue_size)?;
    if let Some(timeout) = analysis.timeout {
        positive_duration("analysis", "timeout", timeout)?;
    }
    if analysis.workers > 1
        && !analysis
            .output
            .to_string_lossy()
            .contains(SEGMENT_PLACEHOLDER)
    {
        return Err(ConfigError::invalid_value(
            "analysis",
            "output",
            "must contain '{segment}' when workers > 1",
        ));
    }
    Ok(())
}

fn validate_results(config: &Config) -> Result<()> {
    if let Some(publish) = &config.results.publish {
        if publish.target.is_empty() {
            return Err(ConfigError::missing_field("results.publish", "target"));
        }
        positive("results.publish", "retry_attempts", publish.retry_attempts)?;
        positive_duration(
            "results.publish",
            "connection_timeout",
            publish.connection_timeout,
        )?;
    }
    if let Some(store) = &config.results.store
        && store.path.as_os_str().is_empty()
    {
        return Err(ConfigError::missing_field("results.store", "path"));
    }
    if let Some(archive) = &config.results.archive {
        if archive.dir.as_os_str().is_empty() {
            return Err(ConfigError::missing_field("results.archive", "dir"));
        }
        positive("results.archive", "ring_size", archive.ring_size)?;
        if archive.max_size == 0 {
            return Err(ConfigError::invalid_value(
                "results.archive",
                "max_size",
                "must be positive",
            ));
        }
    }
    Ok(())
}
