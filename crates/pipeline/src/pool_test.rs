//! Analysis pool tests

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use capline_analysis::{AnalysisError, AnalysisReport, Result as AnalysisResult};
use capline_config::OutputFormat;

use super::*;

// ============================================================================
// Helper Functions
// ============================================================================

/// Records analysed paths; optionally gated by a semaphore or failing
#[derive(Default)]
struct FakeTrigger {
    seen: SyncMutex<Vec<PathBuf>>,
    /// File existed when analysis ran
    existed: SyncMutex<Vec<bool>>,
    gate: Option<Arc<Semaphore>>,
    fail: bool,
}

#[async_trait]
impl AnalysisTrigger for FakeTrigger {
    fn name(&self) -> &str {
        "fake"
    }

    async fn analyze(&self, segment: &Path) -> AnalysisResult<AnalysisReport> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.seen.lock().push(segment.to_path_buf());
        self.existed.lock().push(segment.exists());
        if self.fail {
            return Err(AnalysisError::Io(std::io::Error::other("tool crashed")));
        }
        Ok(AnalysisReport::empty(segment, OutputFormat::JsonLines))
    }
}

fn settings(workers: usize, queue_size: usize) -> PoolSettings {
    PoolSettings {
        workers,
        queue_size,
        keep_segments: false,
    }
}

fn segment_file(dir: &TempDir, index: usize) -> PathBuf {
    let path = dir.path().join(format!("trace_{index:02}.pcapng"));
    std::fs::write(&path, b"[]").unwrap();
    path
}

fn job(index: usize, path: PathBuf) -> (AnalysisJob, oneshot::Receiver<()>) {
    let (done_tx, done_rx) = oneshot::channel();
    let closed = tokio::spawn(async { true });
    (AnalysisJob::new(index, path, closed, done_tx), done_rx)
}

// ============================================================================
// Job lifecycle
// ============================================================================

#[tokio::test]
async fn test_analyse_then_delete_then_done() {
    let dir = TempDir::new().unwrap();
    let trigger = Arc::new(FakeTrigger::default());
    let (pool, sender) = AnalysisPool::start(
        Some(trigger.clone() as Arc<dyn AnalysisTrigger>),
        Arc::new(ResultDispatcher::new()),
        settings(1, 4),
    );

    let path = segment_file(&dir, 0);
    let (job, done) = job(0, path.clone());
    sender.submit(job).await.unwrap();
    done.await.unwrap();

    assert_eq!(*trigger.seen.lock(), vec![path.clone()]);
    assert_eq!(*trigger.existed.lock(), vec![true]);
    assert!(!path.exists());

    drop(sender);
    assert!(pool.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_analysis_waits_for_close() {
    let dir = TempDir::new().unwrap();
    let trigger = Arc::new(FakeTrigger::default());
    let (_pool, sender) = AnalysisPool::start(
        Some(trigger.clone() as Arc<dyn AnalysisTrigger>),
        Arc::new(ResultDispatcher::new()),
        settings(1, 4),
    );

    let path = dir.path().join("trace_00.pcapng");
    let (done_tx, done_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let close_path = path.clone();
    let closed = tokio::spawn(async move {
        let _ = release_rx.await;
        // The sink produces the file only when it exits
        tokio::fs::write(&close_path, b"[]").await.unwrap();
        true
    });
    sender
        .submit(AnalysisJob::new(0, path, closed, done_tx))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(trigger.seen.lock().is_empty());

    release_tx.send(()).unwrap();
    done_rx.await.unwrap();
    assert_eq!(*trigger.existed.lock(), vec![true]);
}

#[tokio::test]
async fn test_failed_analysis_still_deletes() {
    let dir = TempDir::new().unwrap();
    let trigger = Arc::new(FakeTrigger {
        fail: true,
        ..FakeTrigger::default()
    });
    let (pool, sender) = AnalysisPool::start(
        Some(trigger as Arc<dyn AnalysisTrigger>),
        Arc::new(ResultDispatcher::new()),
        settings(1, 4),
    );

    let path = segment_file(&dir, 1);
    let (job, done) = job(1, path.clone());
    sender.submit(job).await.unwrap();
    done.await.unwrap();

    assert!(!path.exists());
    let snapshot = pool.metrics_handle().snapshot();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.deleted, 1);
}

#[tokio::test]
async fn test_without_trigger_segments_kept() {
    let dir = TempDir::new().unwrap();
    let (_pool, sender) =
        AnalysisPool::start(None, Arc::new(ResultDispatcher::new()), settings(1, 4));

    let path = segment_file(&dir, 0);
    let (job, done) = job(0, path.clone());
    sender.submit(job).await.unwrap();
    done.await.unwrap();
    assert!(path.exists());
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn test_full_queue_blocks_submit() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let trigger = Arc::new(FakeTrigger {
        gate: Some(Arc::clone(&gate)),
        ..FakeTrigger::default()
    });
    let (pool, sender) = AnalysisPool::start(
        Some(trigger.clone() as Arc<dyn AnalysisTrigger>),
        Arc::new(ResultDispatcher::new()),
        settings(1, 1),
    );

    // First job occupies the worker, second fills the queue
    let (first, _d1) = job(0, segment_file(&dir, 0));
    sender.submit(first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (second, _d2) = job(1, segment_file(&dir, 1));
    sender.submit(second).await.unwrap();

    let (third, d3) = job(2, segment_file(&dir, 2));
    let blocked = {
        let sender = sender.clone();
        tokio::spawn(async move { sender.submit(third).await.is_ok() })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!blocked.is_finished());

    gate.add_permits(3);
    assert!(blocked.await.unwrap());
    d3.await.unwrap();
    assert_eq!(trigger.seen.lock().len(), 3);
    assert!(pool.metrics_handle().snapshot().submit_waits >= 1);
}

#[tokio::test]
async fn test_shutdown_times_out_on_stuck_worker() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let trigger = Arc::new(FakeTrigger {
        gate: Some(gate),
        ..FakeTrigger::default()
    });
    let (pool, sender) = AnalysisPool::start(
        Some(trigger as Arc<dyn AnalysisTrigger>),
        Arc::new(ResultDispatcher::new()),
        settings(1, 1),
    );
    let (stuck, _done) = job(0, segment_file(&dir, 0));
    sender.submit(stuck).await.unwrap();
    drop(sender);

    assert!(!pool.shutdown(Duration::from_millis(50)).await);
}
