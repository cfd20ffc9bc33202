//! Upstream acknowledgments
//!
//! An [`AckHandle`] carries the commit callbacks of one or more upstream
//! messages. Handles are consumed when fired, so a callback can run at most
//! once; a handle that is dropped unfired leaves its messages uncommitted and
//! the upstream redelivers them.
//!
//! Several messages may contribute to one record (an object split across
//! payloads), so handles merge:
//!
//! ```text
//! msg 1 ─┐
//! msg 2 ─┼─► AckHandle ──► QueueItem ──► writer hand-off ──► fire()
//! msg 3 ─┘
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::AckError;
use crate::metrics::AckMetrics;
use crate::rate_limited::RateLimitedLogger;

type AckFn = Box<dyn FnOnce() -> Result<(), AckError> + Send>;

/// Firing a handle where at least one callback failed
#[derive(Debug)]
pub struct AckFailure {
    /// Callbacks that succeeded
    pub fired: usize,
    /// Callbacks that returned an error
    pub failed: usize,
    /// The first error returned
    pub error: AckError,
}

/// Zero or more pending acknowledgment callbacks
#[derive(Default)]
pub struct AckHandle {
    callbacks: Vec<AckFn>,
}

impl AckHandle {
    /// Handle with a single callback
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() -> Result<(), AckError> + Send + 'static,
    {
        Self {
            callbacks: vec![Box::new(callback)],
        }
    }

    /// Handle with nothing to acknowledge
    pub fn none() -> Self {
        Self::default()
    }

    /// Take over every callback of `other`
    pub fn merge(&mut self, mut other: AckHandle) {
        self.callbacks.append(&mut other.callbacks);
    }

    /// Move the callbacks out, leaving this handle empty
    pub fn take(&mut self) -> AckHandle {
        std::mem::take(self)
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Number of pending callbacks
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Run every callback
    ///
    /// All callbacks run even if some fail. Returns the number that
    /// succeeded, or the outcome counts with the first error.
    pub fn fire(self) -> Result<usize, AckFailure> {
        let mut fired = 0;
        let mut failed = 0;
        let mut first_error = None;
        for callback in self.callbacks {
            match callback() {
                Ok(()) => fired += 1,
                Err(e) => {
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(error) => Err(AckFailure {
                fired,
                failed,
                error,
            }),
            None => Ok(fired),
        }
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Fires acknowledgments, counting outcomes and logging failures
///
/// Callback failures never stop the pipeline.
#[derive(Debug, Clone, Default)]
pub struct AckTracker {
    metrics: Arc<AckMetrics>,
    errors: Arc<RateLimitedLogger>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics_handle(&self) -> Arc<AckMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Fire `ack`, logging rather than returning any failure
    pub fn fire(&self, ack: AckHandle) {
        if ack.is_empty() {
            return;
        }
        match ack.fire() {
            Ok(fired) => self.metrics.record_fired(fired),
            Err(failure) => {
                self.metrics.record_fired(failure.fired);
                self.metrics.record_failed(failure.failed);
                self.errors
                    .error("acknowledgment callback failed", &failure.error);
            }
        }
    }

    /// Discard `ack` unfired so the upstream redelivers
    pub fn drop_unfired(&self, ack: AckHandle) {
        if !ack.is_empty() {
            self.metrics.record_dropped(ack.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> AckHandle {
        let counter = Arc::clone(counter);
        AckHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_merge_fires_all_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut ack = counting(&counter);
        ack.merge(counting(&counter));
        ack.merge(AckHandle::none());
        assert_eq!(ack.len(), 2);

        assert_eq!(ack.fire().unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_take_leaves_empty() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pending = counting(&counter);
        let taken = pending.take();
        assert!(pending.is_empty());
        assert_eq!(taken.len(), 1);
    }

    #[test]
    fn test_failure_does_not_skip_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut ack = AckHandle::new(|| Err(AckError::commit("down")));
        ack.merge(counting(&counter));

        let failure = ack.fire().unwrap_err();
        assert_eq!((failure.fired, failure.failed), (1, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tracker_counts_each_failed_callback() {
        let tracker = AckTracker::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut ack = AckHandle::new(|| Err(AckError::commit("down")));
        ack.merge(counting(&counter));
        ack.merge(AckHandle::new(|| Err(AckError::commit("still down"))));
        ack.merge(counting(&counter));
        tracker.fire(ack);

        let snapshot = tracker.metrics_handle().snapshot();
        assert_eq!(snapshot.fired, 2);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_tracker_counts() {
        let tracker = AckTracker::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut ack = counting(&counter);
        ack.merge(AckHandle::new(|| Err(AckError::commit("down"))));
        tracker.fire(ack);
        tracker.drop_unfired(counting(&counter));
        tracker.fire(AckHandle::none());

        let snapshot = tracker.metrics_handle().snapshot();
        assert_eq!(snapshot.fired, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
