//! Upstream messages and explicit commits
//!
//! A [`Message`] is acknowledged by calling [`Message::commit`] (or the
//! detached [`CommitHandle`]). The first call reaches the source, later calls
//! are no-ops, so the pipeline may commit from whichever path handled the
//! message last.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use crate::error::Result;

/// Byte range (or sequence range) a message occupies in its partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OffsetRange {
    /// First offset of the message
    pub start: u64,
    /// Offset just past the message
    pub end: u64,
}

impl OffsetRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

/// Receives commits for a source
pub trait Committer: Send + Sync {
    /// Mark `range` of `partition` as processed
    fn commit(&self, partition: u64, range: OffsetRange) -> Result<()>;
}

struct CommitState {
    committed: AtomicBool,
    partition: u64,
    range: OffsetRange,
    committer: Arc<dyn Committer>,
}

/// Detached, cloneable commit for one message
#[derive(Clone)]
pub struct CommitHandle {
    state: Arc<CommitState>,
}

impl CommitHandle {
    /// Create a handle committing `range` through `committer`
    pub fn new(committer: Arc<dyn Committer>, partition: u64, range: OffsetRange) -> Self {
        Self {
            state: Arc::new(CommitState {
                committed: AtomicBool::new(false),
                partition,
                range,
                committer,
            }),
        }
    }

    /// Commit the message
    ///
    /// Returns `Ok(true)` for the call that reached the source and `Ok(false)`
    /// for every later call.
    pub fn commit(&self) -> Result<bool> {
        if self.state.committed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.state
            .committer
            .commit(self.state.partition, self.state.range)?;
        Ok(true)
    }

    /// Whether commit was already called
    pub fn is_committed(&self) -> bool {
        self.state.committed.load(Ordering::Acquire)
    }

    /// Offsets covered by this commit
    pub fn range(&self) -> OffsetRange {
        self.state.range
    }
}

impl fmt::Debug for CommitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitHandle")
            .field("partition", &self.state.partition)
            .field("range", &self.state.range)
            .field("committed", &self.is_committed())
            .finish()
    }
}

/// One upstream message
#[derive(Debug, Clone)]
pub struct Message {
    payload: Bytes,
    partition: u64,
    commit: CommitHandle,
}

impl Message {
    pub fn new(payload: Bytes, partition: u64, commit: CommitHandle) -> Self {
        Self {
            payload,
            partition,
            commit,
        }
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Partition the message belongs to; order is preserved per partition
    pub fn partition(&self) -> u64 {
        self.partition
    }

    /// Offsets covered by the message
    pub fn offset(&self) -> OffsetRange {
        self.commit.range()
    }

    /// Commit the message (idempotent)
    pub fn commit(&self) -> Result<bool> {
        self.commit.commit()
    }

    /// Detached commit handle, for acknowledging after the message is gone
    pub fn commit_handle(&self) -> CommitHandle {
        self.commit.clone()
    }
}
