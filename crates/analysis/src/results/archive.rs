//! Rotating archive of raw result lines
//!
//! Lines are appended to `<dir>/<prefix>_<NN>.<ext>`. Once the current file
//! reaches `max_size` the next index is truncated and used, wrapping after
//! `ring_size` files:
//!
//! ```text
//! results_00.csv ──► results_01.csv ──► ... ──► results_05.csv ──┐
//!        ▲                                                       │
//!        └───────────────────── truncated on reuse ◄─────────────┘
//! ```
//!
//! CSV reports re-emit their header at the top of every fresh file so each
//! archive file is readable on its own.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use capline_config::ArchiveConfig;

use super::{DeliveryStats, ResultSink};
use crate::error::ResultSinkError;
use crate::trigger::AnalysisReport;

struct ArchiveState {
    index: usize,
    file: File,
    size: u64,
}

/// Size-rotated ring of result files
pub struct ArchiveRing {
    name: String,
    config: ArchiveConfig,
    state: Mutex<ArchiveState>,
}

impl ArchiveRing {
    /// Open the ring, continuing in the most recently written file
    pub async fn open(config: &ArchiveConfig) -> Result<Self, ResultSinkError> {
        tokio::fs::create_dir_all(&config.dir)
            .await
            .map_err(|e| ResultSinkError::store(&config.dir, e))?;

        let index = latest_index(config).await;
        let path = file_path(config, index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| ResultSinkError::store(&path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| ResultSinkError::store(&path, e))?
            .len();

        Ok(Self {
            name: format!("archive:{}", config.dir.display()),
            config: config.clone(),
            state: Mutex::new(ArchiveState { index, file, size }),
        })
    }

    /// Path of the file currently appended to
    pub async fn current_path(&self) -> PathBuf {
        file_path(&self.config, self.state.lock().await.index)
    }

    async fn rotate(&self, state: &mut ArchiveState) -> Result<(), ResultSinkError> {
        state.file.flush().await?;
        let index = (state.index + 1) % self.config.ring_size.max(1);
        let path = file_path(&self.config, index);
        state.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| ResultSinkError::store(&path, e))?;
        state.index = index;
        state.size = 0;
        tracing::debug!(sink = %self.name, path = %path.display(), "archive rotated");
        Ok(())
    }
}

/// `<dir>/<prefix>_<NN>.<ext>`
pub fn file_path(config: &ArchiveConfig, index: usize) -> PathBuf {
    config
        .dir
        .join(format!("{}_{:02}.{}", config.prefix, index, config.extension))
}

async fn latest_index(config: &ArchiveConfig) -> usize {
    let mut latest: Option<(SystemTime, usize)> = None;
    for index in 0..config.ring_size.max(1) {
        let Ok(meta) = tokio::fs::metadata(file_path(config, index)).await else {
            continue;
        };
        let Ok(modified) = meta.modified() else {
            continue;
        };
        if latest.is_none_or(|(t, _)| modified > t) {
            latest = Some((modified, index));
        }
    }
    latest.map_or(0, |(_, index)| index)
}

async fn append(state: &mut ArchiveState, path: &Path, bytes: &[u8]) -> Result<(), ResultSinkError> {
    state
        .file
        .write_all(bytes)
        .await
        .map_err(|e| ResultSinkError::store(path, e))?;
    state.size += bytes.len() as u64;
    Ok(())
}

#[async_trait]
impl ResultSink for ArchiveRing {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, report: &AnalysisReport) -> Result<DeliveryStats, ResultSinkError> {
        let mut state = self.state.lock().await;
        let mut delivered = 0u64;

        for line in &report.lines {
            if state.size >= self.config.max_size {
                self.rotate(&mut state).await?;
            }
            let path = file_path(&self.config, state.index);
            if state.size == 0
                && let Some(header) = &report.header
            {
                append(&mut state, &path, format!("{header}\n").as_bytes()).await?;
            }
            append(&mut state, &path, format!("{line}\n").as_bytes()).await?;
            delivered += 1;
        }

        state.file.flush().await?;
        Ok(DeliveryStats::delivered(delivered))
    }
}
