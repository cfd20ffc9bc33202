//! Rate-limited logging for hot-path failures
//!
//! A failing sink or a full queue can produce the same event thousands of
//! times per second. Each logger emits at most one line per interval and
//! reports how many events it swallowed in between.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default interval between emitted lines
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Warn,
    Error,
}

/// Logs at most once per interval, counting suppressed events
#[derive(Debug)]
pub struct RateLimitedLogger {
    min_interval: Duration,
    last_log_time: Mutex<Option<Instant>>,
    /// Events since the last emitted line
    pending: AtomicU64,
    total: AtomicU64,
}

impl Default for RateLimitedLogger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}

impl RateLimitedLogger {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_log_time: Mutex::new(None),
            pending: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Record a warning; returns true if it was logged
    pub fn warn(&self, message: &str, detail: &dyn Display) -> bool {
        self.record(Level::Warn, message, detail)
    }

    /// Record an error; returns true if it was logged
    pub fn error(&self, message: &str, error: &dyn Display) -> bool {
        self.record(Level::Error, message, error)
    }

    /// Events recorded since the last emitted line
    pub fn pending_count(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn record(&self, level: Level, message: &str, detail: &dyn Display) -> bool {
        self.pending.fetch_add(1, Ordering::Relaxed);
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let mut last = self.last_log_time.lock();
            let now = Instant::now();
            match *last {
                Some(at) if now.duration_since(at) < self.min_interval => return false,
                _ => *last = Some(now),
            }
        }

        let suppressed = self.pending.swap(0, Ordering::Relaxed).saturating_sub(1);
        match level {
            Level::Warn => tracing::warn!(
                event = %message,
                detail = %detail,
                suppressed,
                total,
                "rate-limited warning"
            ),
            Level::Error => tracing::error!(
                event = %message,
                error = %detail,
                suppressed,
                total,
                "rate-limited error"
            ),
        }
        true
    }
}
