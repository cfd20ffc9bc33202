//! Segments and their on-disk layout
//!
//! A segment is one rotation-bounded JSON array written into a sink. Its path
//! comes from a bounded ring of indices:
//!
//! ```text
//! <dir>/<prefix>_00.<ext>, <prefix>_01.<ext>, ... <prefix>_<N-1>.<ext>, then 00 again
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::Value;

use capline_config::SegmentConfig;

use crate::error::Result;
use crate::sink::{SegmentSink, SinkLauncher};

/// Naming scheme for ring slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLayout {
    dir: PathBuf,
    prefix: String,
    extension: String,
    ring_size: usize,
}

impl SegmentLayout {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: impl Into<String>,
        ring_size: usize,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            extension: extension.into(),
            ring_size: ring_size.max(1),
        }
    }

    pub fn from_config(config: &SegmentConfig) -> Self {
        Self::new(
            config.dir.clone(),
            config.prefix.clone(),
            config.extension.clone(),
            config.ring_size,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ring_size(&self) -> usize {
        self.ring_size
    }

    /// Path of ring slot `index`
    pub fn path(&self, index: usize) -> PathBuf {
        self.dir.join(format!(
            "{}_{:02}.{}",
            self.prefix,
            index % self.ring_size,
            self.extension
        ))
    }

    /// Slot after `index`, wrapping to zero
    pub fn next(&self, index: usize) -> usize {
        (index + 1) % self.ring_size
    }
}

/// The segment currently accepting records
///
/// Only the writer holds one; once closed it never accepts writes again.
pub struct ActiveSegment {
    index: usize,
    sink: Box<dyn SegmentSink>,
    records: u64,
    /// Bytes handed to the sink, array framing included
    written: u64,
    opened_at: Instant,
    /// A write failed; the segment should be rotated out
    failed: bool,
}

impl ActiveSegment {
    /// Launch a sink for slot `index` and open the JSON array
    pub async fn open(layout: &SegmentLayout, index: usize, launcher: &dyn SinkLauncher) -> Result<Self> {
        let path = layout.path(index);
        let mut sink = launcher.launch(&path).await?;
        sink.write(b"[").await?;
        Ok(Self {
            index,
            sink,
            records: 0,
            written: 1,
            opened_at: Instant::now(),
            failed: false,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        self.sink.path()
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn age(&self) -> std::time::Duration {
        self.opened_at.elapsed()
    }

    /// Append `record` as the next array element
    ///
    /// Returns the bytes handed to the sink.
    pub async fn append(&mut self, record: &Value) -> Result<usize> {
        let encoded = serde_json::to_vec(record)?;
        let separated = if self.records > 0 {
            self.sink.write(b",").await
        } else {
            Ok(())
        };
        let result = match separated {
            Ok(()) => self.sink.write(&encoded).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.failed = true;
            return Err(e);
        }

        let bytes = encoded.len() + usize::from(self.records > 0);
        self.records += 1;
        self.written += bytes as u64;
        Ok(bytes)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.sink.flush().await
    }

    /// Current size of the segment file; zero if it does not exist yet
    ///
    /// The returned future does not borrow the segment.
    pub fn on_disk_size(&self) -> impl Future<Output = u64> + Send + 'static {
        let path = self.sink.path().to_path_buf();
        async move {
            tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .unwrap_or(0)
        }
    }

    /// Terminate the array and wait for the sink to finish
    pub async fn close(mut self) -> Result<()> {
        let terminated = self.sink.write(b"]").await;
        let finished = self.sink.finish().await;
        terminated.and(finished)
    }
}

impl std::fmt::Debug for ActiveSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSegment")
            .field("index", &self.index)
            .field("path", &self.sink.path())
            .field("records", &self.records)
            .field("written", &self.written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FileLauncher;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_layout_naming_and_wrap() {
        let layout = SegmentLayout::new("/captures", "trace", "pcapng", 3);
        assert_eq!(layout.path(2), PathBuf::from("/captures/trace_02.pcapng"));
        assert_eq!(layout.next(0), 1);
        assert_eq!(layout.next(2), 0);
    }

    #[test]
    fn test_zero_ring_treated_as_one() {
        let layout = SegmentLayout::new("d", "p", "e", 0);
        assert_eq!(layout.ring_size(), 1);
        assert_eq!(layout.next(0), 0);
    }

    #[tokio::test]
    async fn test_array_framing() {
        let dir = TempDir::new().unwrap();
        let layout = SegmentLayout::new(dir.path(), "trace", "json", 2);
        let launcher = FileLauncher::new(64);

        let mut segment = ActiveSegment::open(&layout, 1, &launcher).await.unwrap();
        assert_eq!(segment.append(&json!({"x": 1})).await.unwrap(), 7);
        assert_eq!(segment.append(&json!({"y": 2})).await.unwrap(), 8);
        assert_eq!(segment.records(), 2);
        assert_eq!(segment.written(), 1 + 7 + 8);

        let path = segment.path().to_path_buf();
        segment.close().await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), r#"[{"x":1},{"y":2}]"#);
    }

    #[tokio::test]
    async fn test_empty_segment_is_valid_array() {
        let dir = TempDir::new().unwrap();
        let layout = SegmentLayout::new(dir.path(), "trace", "json", 2);
        let segment = ActiveSegment::open(&layout, 0, &FileLauncher::new(64))
            .await
            .unwrap();
        segment.close().await.unwrap();
        assert_eq!(std::fs::read_to_string(layout.path(0)).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_on_disk_size_follows_flush() {
        let dir = TempDir::new().unwrap();
        let layout = SegmentLayout::new(dir.path(), "trace", "json", 2);
        let mut segment = ActiveSegment::open(&layout, 0, &FileLauncher::new(1024))
            .await
            .unwrap();
        segment.append(&json!(1)).await.unwrap();
        assert_eq!(segment.on_disk_size().await, 0);

        segment.flush().await.unwrap();
        assert_eq!(segment.on_disk_size().await, 2);
    }
}
