//! Rotation coordinator tests

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use capline_analysis::{AnalysisReport, AnalysisTrigger, ResultDispatcher};
use capline_config::OutputFormat;

use super::*;
use crate::pool::{AnalysisPool, PoolSettings};
use crate::sink::{FileLauncher, SegmentSink};

// ============================================================================
// Helper Functions
// ============================================================================

type Events = Arc<SyncMutex<Vec<String>>>;

fn slot_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

/// File launcher that logs each launch and whether the path already existed
struct RecordingLauncher {
    inner: FileLauncher,
    events: Events,
    /// Number of launches to fail before succeeding
    failures: AtomicUsize,
}

impl RecordingLauncher {
    fn new(events: &Events) -> Self {
        Self {
            inner: FileLauncher::new(64),
            events: Arc::clone(events),
            failures: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SinkLauncher for RecordingLauncher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn launch(&self, path: &Path) -> Result<Box<dyn SegmentSink>> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PipelineError::launch(path, std::io::Error::other("no capacity")));
        }
        self.events.lock().push(format!(
            "launch {} existed={}",
            slot_name(path),
            path.exists()
        ));
        self.inner.launch(path).await
    }
}

/// Analyzer gated by a semaphore, logging each run
struct GatedTrigger {
    gate: Arc<Semaphore>,
    events: Events,
}

#[async_trait]
impl AnalysisTrigger for GatedTrigger {
    fn name(&self) -> &str {
        "gated"
    }

    async fn analyze(&self, segment: &Path) -> capline_analysis::Result<AnalysisReport> {
        self.gate.acquire().await.unwrap().forget();
        self.events.lock().push(format!("analyze {}", slot_name(segment)));
        Ok(AnalysisReport::empty(segment, OutputFormat::JsonLines))
    }
}

/// Sink whose finish always fails
struct BrokenSink {
    path: PathBuf,
}

#[async_trait]
impl SegmentSink for BrokenSink {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        Err(PipelineError::sink_exit(&self.path, "exit status: 1"))
    }
}

struct BrokenLauncher;

#[async_trait]
impl SinkLauncher for BrokenLauncher {
    fn name(&self) -> &str {
        "broken"
    }

    async fn launch(&self, path: &Path) -> Result<Box<dyn SegmentSink>> {
        Ok(Box::new(BrokenSink {
            path: path.to_path_buf(),
        }))
    }
}

fn coordinator(
    dir: &TempDir,
    ring_size: usize,
    launcher: Arc<dyn SinkLauncher>,
    jobs: JobSender,
) -> RotationCoordinator {
    RotationCoordinator::new(
        SegmentLayout::new(dir.path().join("captures"), "trace", "json", ring_size),
        launcher,
        jobs,
        Duration::from_millis(10),
        AckTracker::new(),
        Arc::new(WriterMetrics::new()),
    )
}

fn counting_ack(counter: &Arc<AtomicUsize>) -> AckHandle {
    let counter = Arc::clone(counter);
    AckHandle::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

// ============================================================================
// Ring handshake
// ============================================================================

#[tokio::test]
async fn test_wrap_waits_for_previous_occupant() {
    let dir = TempDir::new().unwrap();
    let events: Events = Arc::default();
    let gate = Arc::new(Semaphore::new(0));
    let trigger = Arc::new(GatedTrigger {
        gate: Arc::clone(&gate),
        events: Arc::clone(&events),
    });
    let (_pool, jobs) = AnalysisPool::start(
        Some(trigger as Arc<dyn AnalysisTrigger>),
        Arc::new(ResultDispatcher::new()),
        PoolSettings {
            workers: 2,
            queue_size: 4,
            keep_segments: false,
        },
    );

    let mut coord = coordinator(&dir, 2, Arc::new(RecordingLauncher::new(&events)), jobs);
    let cancel = CancellationToken::new();

    let first = coord.open_first().await.unwrap();
    assert_eq!(first.index(), 0);
    let second = coord
        .rotate(first, AckHandle::none(), RotationReason::Size, &cancel)
        .await
        .unwrap();
    assert_eq!(second.index(), 1);

    // Slot 0 is still being analysed, so reopening it must wait
    let wrap = tokio::spawn(async move {
        let reopened = coord
            .rotate(second, AckHandle::none(), RotationReason::Size, &cancel)
            .await;
        (coord, reopened)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!wrap.is_finished());

    gate.add_permits(2);
    let (_coord, reopened) = wrap.await.unwrap();
    assert_eq!(reopened.unwrap().index(), 0);

    let events = events.lock().clone();
    let relaunch = events
        .iter()
        .rposition(|e| e.starts_with("launch trace_00.json"))
        .unwrap();
    let analysed = events
        .iter()
        .position(|e| e == "analyze trace_00.json")
        .unwrap();
    assert!(analysed < relaunch);
    assert_eq!(events[relaunch], "launch trace_00.json existed=false");
}

#[tokio::test]
async fn test_cancelled_wait_keeps_slot_guarded() {
    let dir = TempDir::new().unwrap();
    let events: Events = Arc::default();
    let gate = Arc::new(Semaphore::new(0));
    let trigger = Arc::new(GatedTrigger {
        gate: Arc::clone(&gate),
        events: Arc::clone(&events),
    });
    let (_pool, jobs) = AnalysisPool::start(
        Some(trigger as Arc<dyn AnalysisTrigger>),
        Arc::new(ResultDispatcher::new()),
        PoolSettings {
            workers: 1,
            queue_size: 4,
            keep_segments: false,
        },
    );

    let mut coord = coordinator(&dir, 1, Arc::new(RecordingLauncher::new(&events)), jobs);
    let cancelled = CancellationToken::new();
    cancelled.cancel();

    let first = coord.open_first().await.unwrap();
    assert!(
        coord
            .rotate(first, AckHandle::none(), RotationReason::Size, &cancelled)
            .await
            .is_none()
    );

    // Giving up once must not free the slot for the next attempt
    assert!(coord.open_next(&cancelled).await.is_none());
    let launches = |events: &Events| {
        events
            .lock()
            .iter()
            .filter(|e| e.starts_with("launch trace_00.json"))
            .count()
    };
    assert_eq!(launches(&events), 1);

    let reopen = tokio::spawn(async move {
        let reopened = coord.open_next(&CancellationToken::new()).await;
        (coord, reopened)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reopen.is_finished());
    assert_eq!(launches(&events), 1);

    gate.add_permits(1);
    let (_coord, reopened) = reopen.await.unwrap();
    assert_eq!(reopened.unwrap().index(), 0);

    let events = events.lock().clone();
    assert_eq!(
        events,
        vec![
            "launch trace_00.json existed=false".to_string(),
            "analyze trace_00.json".to_string(),
            "launch trace_00.json existed=false".to_string(),
        ]
    );
}

// ============================================================================
// Closing and acknowledgments
// ============================================================================

#[tokio::test]
async fn test_held_acks_fire_after_clean_close() {
    let dir = TempDir::new().unwrap();
    let (_pool, jobs) =
        AnalysisPool::start(None, Arc::new(ResultDispatcher::new()), PoolSettings::default());
    let mut coord = coordinator(&dir, 3, Arc::new(FileLauncher::new(64)), jobs);

    let counter = Arc::new(AtomicUsize::new(0));
    let segment = coord.open_first().await.unwrap();
    let path = segment.path().to_path_buf();
    coord
        .retire(segment, counting_ack(&counter), RotationReason::Shutdown)
        .await;

    // The close task runs in the background
    for _ in 0..50 {
        if counter.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_to_string(path).unwrap(), "[]");
}

#[tokio::test]
async fn test_held_acks_dropped_when_sink_fails() {
    let dir = TempDir::new().unwrap();
    let (pool, jobs) =
        AnalysisPool::start(None, Arc::new(ResultDispatcher::new()), PoolSettings::default());
    let mut coord = coordinator(&dir, 3, Arc::new(BrokenLauncher), jobs);
    let acks = coord.acks.clone();
    let metrics = Arc::clone(&coord.metrics);

    let counter = Arc::new(AtomicUsize::new(0));
    let segment = coord.open_first().await.unwrap();
    coord
        .retire(segment, counting_ack(&counter), RotationReason::Size)
        .await;
    drop(coord);
    assert!(pool.shutdown(Duration::from_secs(1)).await);

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(acks.metrics_handle().snapshot().dropped, 1);
    assert_eq!(metrics.snapshot().close_failures, 1);
}

// ============================================================================
// Opening
// ============================================================================

#[tokio::test]
async fn test_open_retries_until_success() {
    let dir = TempDir::new().unwrap();
    let events: Events = Arc::default();
    let launcher = Arc::new(RecordingLauncher::new(&events));
    let (_pool, jobs) =
        AnalysisPool::start(None, Arc::new(ResultDispatcher::new()), PoolSettings::default());
    let mut coord = coordinator(&dir, 3, launcher.clone(), jobs);
    let cancel = CancellationToken::new();

    let first = coord.open_first().await.unwrap();
    launcher.failures.store(2, Ordering::SeqCst);
    let next = coord
        .rotate(first, AckHandle::none(), RotationReason::Size, &cancel)
        .await
        .unwrap();

    assert_eq!(next.index(), 1);
    assert_eq!(coord.metrics.snapshot().open_failures, 2);
}

#[tokio::test]
async fn test_open_gives_up_when_cancelled() {
    let dir = TempDir::new().unwrap();
    let events: Events = Arc::default();
    let launcher = Arc::new(RecordingLauncher::new(&events));
    let (_pool, jobs) =
        AnalysisPool::start(None, Arc::new(ResultDispatcher::new()), PoolSettings::default());
    let mut coord = coordinator(&dir, 3, launcher.clone(), jobs);

    launcher.failures.store(usize::MAX, Ordering::SeqCst);
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(coord.open_next(&cancel).await.is_none());
}

#[tokio::test]
async fn test_first_open_failure_is_error() {
    let dir = TempDir::new().unwrap();
    let events: Events = Arc::default();
    let launcher = Arc::new(RecordingLauncher::new(&events));
    launcher.failures.store(1, Ordering::SeqCst);
    let (_pool, jobs) =
        AnalysisPool::start(None, Arc::new(ResultDispatcher::new()), PoolSettings::default());
    let mut coord = coordinator(&dir, 3, launcher, jobs);

    assert!(matches!(
        coord.open_first().await,
        Err(PipelineError::Launch { .. })
    ));
}
