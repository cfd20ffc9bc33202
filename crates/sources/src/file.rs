//! Newline-delimited file source
//!
//! Reads one message per line, optionally following the file as it grows.
//! Commit progress is a byte offset: the watermark only advances over a
//! contiguous prefix of committed lines, so a crash never skips a line whose
//! commit was still outstanding. The watermark is persisted on
//! [`MessageSource::checkpoint`] and used as the start position on the next
//! open.
//!
//! ```text
//! file ──► read_bounded_line ──► Message{offset: start..end}
//!                                     │ commit()
//!                                     ▼
//!                              OffsetTracker ──► checkpoint file
//! ```

use std::collections::BTreeMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, BufReader};
use tokio::time::Instant;

use capline_config::FileSourceConfig;

use crate::common::{ReadLineResult, SourceMetrics, read_bounded_line, trim_newline};
use crate::error::{Result, SourceError};
use crate::message::{CommitHandle, Committer, Message, OffsetRange};
use crate::MessageSource;

/// Partition used for file messages
const FILE_PARTITION: u64 = 0;

/// Contiguous commit watermark over byte ranges
#[derive(Debug)]
pub struct OffsetTracker {
    state: Mutex<TrackerState>,
    metrics: Arc<SourceMetrics>,
}

#[derive(Debug)]
struct TrackerState {
    watermark: u64,
    /// Committed ranges above the watermark, keyed by start
    ahead: BTreeMap<u64, u64>,
}

impl OffsetTracker {
    /// Create a tracker starting at `offset`
    pub fn new(offset: u64, metrics: Arc<SourceMetrics>) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                watermark: offset,
                ahead: BTreeMap::new(),
            }),
            metrics,
        }
    }

    /// Offset below which every line is committed
    pub fn watermark(&self) -> u64 {
        self.state.lock().watermark
    }

    /// Number of committed ranges waiting for an earlier commit
    pub fn pending(&self) -> usize {
        self.state.lock().ahead.len()
    }

    fn mark(&self, range: OffsetRange) {
        let mut state = self.state.lock();
        if range.end <= state.watermark {
            return;
        }
        state.ahead.insert(range.start, range.end);
        loop {
            let watermark = state.watermark;
            match state.ahead.remove(&watermark) {
                Some(end) => state.watermark = end,
                None => break,
            }
        }
    }
}

impl Committer for OffsetTracker {
    fn commit(&self, _partition: u64, range: OffsetRange) -> Result<()> {
        self.mark(range);
        self.metrics.committed();
        Ok(())
    }
}

/// File source
pub struct FileSource {
    id: String,
    path: PathBuf,
    checkpoint_path: PathBuf,
    follow: bool,
    poll_interval: Duration,
    max_line_size: usize,
    reader: BufReader<File>,
    /// Offset just past the last consumed byte (`carry` included)
    position: u64,
    /// Partial trailing line seen at EOF while following
    carry: Vec<u8>,
    line_buf: Vec<u8>,
    exhausted: bool,
    tracker: Arc<OffsetTracker>,
    persisted: Option<u64>,
    metrics: Arc<SourceMetrics>,
}

impl FileSource {
    /// Open the file and seek to the persisted checkpoint
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the checkpoint cannot be read.
    pub async fn open(config: &FileSourceConfig) -> Result<Self> {
        let path = config.path.clone();
        let checkpoint_path = config.checkpoint_path();

        let mut file = File::open(&path).await.map_err(|e| SourceError::Open {
            path: path.clone(),
            source: e,
        })?;
        let len = file.metadata().await?.len();

        let mut start = load_checkpoint(&checkpoint_path).await?.unwrap_or(0);
        if start > len {
            tracing::warn!(
                path = %path.display(),
                checkpoint = start,
                file_len = len,
                "checkpoint beyond end of file, file was truncated; starting from 0"
            );
            start = 0;
        }
        file.seek(SeekFrom::Start(start)).await?;

        tracing::info!(
            path = %path.display(),
            offset = start,
            follow = config.follow,
            "file source opened"
        );

        let metrics = Arc::new(SourceMetrics::new());
        Ok(Self {
            id: format!("file:{}", path.display()),
            path,
            checkpoint_path,
            follow: config.follow,
            poll_interval: config.poll_interval,
            max_line_size: config.max_line_size,
            reader: BufReader::new(file),
            position: start,
            carry: Vec::new(),
            line_buf: Vec::new(),
            exhausted: false,
            tracker: Arc::new(OffsetTracker::new(start, Arc::clone(&metrics))),
            persisted: Some(start),
            metrics,
        })
    }

    /// Commit watermark tracker
    pub fn tracker(&self) -> Arc<OffsetTracker> {
        Arc::clone(&self.tracker)
    }

    /// Path of the file being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn message(&self, payload: Bytes, range: OffsetRange) -> Message {
        let committer: Arc<dyn Committer> = self.tracker.clone();
        Message::new(
            payload,
            FILE_PARTITION,
            CommitHandle::new(committer, FILE_PARTITION, range),
        )
    }
}

#[async_trait]
impl MessageSource for FileSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now() + timeout;

        loop {
            let result = read_bounded_line(&mut self.reader, &mut self.line_buf, self.max_line_size)
                .await
                .inspect_err(|_| self.metrics.error())?;

            match result {
                ReadLineResult::Line(consumed) => {
                    self.position += consumed as u64;
                    if self.line_buf.ends_with(b"\n") || !self.follow {
                        let start = self.position - (self.carry.len() + consumed) as u64;
                        let mut line = std::mem::take(&mut self.carry);
                        line.extend_from_slice(trim_newline(&self.line_buf));
                        self.metrics.message_received(line.len() as u64);
                        let range = OffsetRange::new(start, self.position);
                        return Ok(Some(self.message(Bytes::from(line), range)));
                    }
                    // Writer is mid-line; keep the bytes until the rest arrives
                    self.carry.extend_from_slice(&self.line_buf);
                }
                ReadLineResult::TooLong(consumed) => {
                    let start = self.position - self.carry.len() as u64;
                    self.carry.clear();
                    self.position += consumed as u64;
                    self.metrics.line_too_long();
                    tracing::warn!(
                        path = %self.path.display(),
                        offset = start,
                        max = self.max_line_size,
                        "line exceeds size limit, skipped"
                    );
                    self.tracker.mark(OffsetRange::new(start, self.position));
                    continue;
                }
                ReadLineResult::Eof if !self.follow => {
                    self.exhausted = true;
                    return Ok(None);
                }
                ReadLineResult::Eof => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn checkpoint(&mut self) -> Result<()> {
        let watermark = self.tracker.watermark();
        if self.persisted == Some(watermark) {
            return Ok(());
        }
        store_checkpoint(&self.checkpoint_path, watermark).await?;
        self.persisted = Some(watermark);
        tracing::debug!(
            path = %self.checkpoint_path.display(),
            offset = watermark,
            "checkpoint persisted"
        );
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn metrics_handle(&self) -> Arc<SourceMetrics> {
        Arc::clone(&self.metrics)
    }
}

/// Read a persisted offset; a missing file means "start from the beginning"
async fn load_checkpoint(path: &Path) -> Result<Option<u64>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => match contents.trim().parse::<u64>() {
            Ok(offset) => Ok(Some(offset)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "unreadable checkpoint, starting from 0"
                );
                Ok(None)
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SourceError::checkpoint(path, e)),
    }
}

/// Persist an offset atomically (temp file + rename)
async fn store_checkpoint(path: &Path, offset: u64) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, format!("{offset}\n"))
        .await
        .map_err(|e| SourceError::checkpoint(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| SourceError::checkpoint(path, e))
}

#[cfg(test)]
#[path = "file_test.rs"]
mod file_test;
