//! Writer stall detection
//!
//! Observational only: the watchdog warns when the writer has not handed a
//! record to a sink for longer than the threshold, and never intervenes.

use std::time::{Duration, Instant};

/// Tracks time since the writer's last successful hand-off
#[derive(Debug)]
pub struct StallWatchdog {
    threshold: Duration,
    last_write: Instant,
    last_warning: Option<Instant>,
}

impl StallWatchdog {
    pub fn new(threshold: Duration) -> Self {
        Self::starting_at(threshold, Instant::now())
    }

    pub fn starting_at(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last_write: now,
            last_warning: None,
        }
    }

    /// Note a successful hand-off
    pub fn record_write(&mut self, now: Instant) {
        self.last_write = now;
        self.last_warning = None;
    }

    /// Time since the last hand-off
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_write)
    }

    /// Warn if stalled; at most one warning per threshold period
    ///
    /// Returns true if a warning was emitted.
    pub fn check(&mut self, now: Instant) -> bool {
        let idle = self.idle(now);
        if idle < self.threshold {
            return false;
        }
        if let Some(at) = self.last_warning
            && now.saturating_duration_since(at) < self.threshold
        {
            return false;
        }

        self.last_warning = Some(now);
        tracing::warn!(
            idle_secs = idle.as_secs(),
            threshold_secs = self.threshold.as_secs(),
            "no records written to the active segment recently"
        );
        true
    }
}
