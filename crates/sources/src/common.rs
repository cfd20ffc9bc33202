//! Common types and utilities for sources
//!
//! Shared functionality across the file and TCP sources.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::io::AsyncBufReadExt;

/// Metrics shared by all source types
#[derive(Debug, Default)]
pub struct SourceMetrics {
    /// Currently active connections
    pub connections_active: AtomicU64,

    /// Total connections accepted
    pub connections_total: AtomicU64,

    /// Total messages delivered to the pipeline
    pub messages_received: AtomicU64,

    /// Total payload bytes delivered
    pub bytes_received: AtomicU64,

    /// Lines skipped for exceeding the size limit
    pub lines_too_long: AtomicU64,

    /// Messages committed
    pub commits: AtomicU64,

    /// Total errors encountered
    pub errors: AtomicU64,
}

impl SourceMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            lines_too_long: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn message_received(&self, bytes: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn line_too_long(&self) {
        self.lines_too_long.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn committed(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> SourceMetricsSnapshot {
        SourceMetricsSnapshot {
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            lines_too_long: self.lines_too_long.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of source metrics
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SourceMetricsSnapshot {
    pub connections_active: u64,
    pub connections_total: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub lines_too_long: u64,
    pub commits: u64,
    pub errors: u64,
}

/// Result of reading a bounded line
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadLineResult {
    /// Line read into the buffer; carries bytes consumed (including newline)
    Line(usize),
    /// Line exceeded the limit and was skipped; carries bytes consumed
    TooLong(usize),
    /// Nothing left to read
    Eof,
}

/// Read one line of at most `max_size` bytes
///
/// Oversized lines are consumed up to their newline without being stored,
/// so a single huge line cannot exhaust memory. The returned byte counts let
/// callers keep exact stream offsets.
pub(crate) async fn read_bounded_line<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_size: usize,
) -> io::Result<ReadLineResult> {
    buf.clear();

    let mut total_bytes = 0;
    let mut exceeded_limit = false;

    loop {
        let available = reader.fill_buf().await?;

        if available.is_empty() {
            if total_bytes == 0 {
                return Ok(ReadLineResult::Eof);
            }
            break;
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let (bytes_to_consume, done) = match newline_pos {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        if !exceeded_limit {
            if buf.len() + bytes_to_consume <= max_size {
                buf.extend_from_slice(&available[..bytes_to_consume]);
            } else {
                buf.clear();
                exceeded_limit = true;
            }
        }

        total_bytes += bytes_to_consume;
        reader.consume(bytes_to_consume);

        if done {
            break;
        }
    }

    if exceeded_limit {
        return Ok(ReadLineResult::TooLong(total_bytes));
    }
    Ok(ReadLineResult::Line(total_bytes))
}

/// Strip a trailing LF or CRLF
pub(crate) fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Check if error is a connection reset (expected during shutdown)
pub(crate) fn is_connection_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_metrics_connection_tracking() {
        let metrics = SourceMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_active, 1);
        assert_eq!(snapshot.connections_total, 2);
    }

    #[test]
    fn test_metrics_message_tracking() {
        let metrics = SourceMetrics::new();
        metrics.message_received(100);
        metrics.message_received(200);
        metrics.committed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.bytes_received, 300);
        assert_eq!(snapshot.commits, 1);
    }

    #[tokio::test]
    async fn test_read_bounded_lines() {
        let data: &[u8] = b"first\nsecond\r\nlast";
        let mut reader = BufReader::new(data);
        let mut buf = Vec::new();

        assert_eq!(
            read_bounded_line(&mut reader, &mut buf, 64).await.unwrap(),
            ReadLineResult::Line(6)
        );
        assert_eq!(trim_newline(&buf), b"first");

        assert_eq!(
            read_bounded_line(&mut reader, &mut buf, 64).await.unwrap(),
            ReadLineResult::Line(8)
        );
        assert_eq!(trim_newline(&buf), b"second");

        assert_eq!(
            read_bounded_line(&mut reader, &mut buf, 64).await.unwrap(),
            ReadLineResult::Line(4)
        );
        assert_eq!(buf, b"last");

        assert_eq!(
            read_bounded_line(&mut reader, &mut buf, 64).await.unwrap(),
            ReadLineResult::Eof
        );
    }

    #[tokio::test]
    async fn test_read_too_long_line_skipped() {
        let data: &[u8] = b"0123456789abcdef\nok\n";
        let mut reader = BufReader::with_capacity(4, data);
        let mut buf = Vec::new();

        assert_eq!(
            read_bounded_line(&mut reader, &mut buf, 8).await.unwrap(),
            ReadLineResult::TooLong(17)
        );
        assert_eq!(
            read_bounded_line(&mut reader, &mut buf, 8).await.unwrap(),
            ReadLineResult::Line(3)
        );
        assert_eq!(trim_newline(&buf), b"ok");
    }

    #[test]
    fn test_connection_reset_kinds() {
        assert!(is_connection_reset(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_connection_reset(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_connection_reset(&io::Error::from(io::ErrorKind::NotFound)));
    }
}
