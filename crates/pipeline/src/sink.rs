//! Segment sinks
//!
//! A sink receives the bytes of one segment's JSON array and turns them into
//! the segment file. The writer owns the array framing; sinks only move
//! bytes.
//!
//! - [`ProcessLauncher`] feeds an external synthesis program through its
//!   stdin, with `{output}` in its arguments replaced by the segment path.
//! - [`FileLauncher`] writes the JSON array itself to the segment path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use capline_config::{OUTPUT_PLACEHOLDER, ProcessSinkConfig, SegmentConfig, SegmentSinkConfig};

use crate::error::{PipelineError, Result};

/// Byte sink for one open segment
#[async_trait]
pub trait SegmentSink: Send {
    /// Segment file this sink produces
    fn path(&self) -> &Path;

    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Push buffered bytes through to the sink
    async fn flush(&mut self) -> Result<()>;

    /// Close input and wait for the segment to be complete
    async fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens a sink per segment
#[async_trait]
pub trait SinkLauncher: Send + Sync {
    fn name(&self) -> &str;

    async fn launch(&self, path: &Path) -> Result<Box<dyn SegmentSink>>;
}

/// Build the launcher named by the segment configuration
pub fn launcher_from_config(config: &SegmentConfig) -> Arc<dyn SinkLauncher> {
    match &config.sink {
        SegmentSinkConfig::Process(process) => {
            Arc::new(ProcessLauncher::new(process, config.buffer_size))
        }
        SegmentSinkConfig::File => Arc::new(FileLauncher::new(config.buffer_size)),
    }
}

// ============================================================================
// External process
// ============================================================================

/// Launches the synthesis program once per segment
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    name: String,
    config: ProcessSinkConfig,
    buffer_size: usize,
}

impl ProcessLauncher {
    pub fn new(config: &ProcessSinkConfig, buffer_size: usize) -> Self {
        let name = Path::new(&config.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.program.clone());
        Self {
            name,
            config: config.clone(),
            buffer_size,
        }
    }

    /// Arguments with `{output}` replaced by `path`
    pub fn args_for(&self, path: &Path) -> Vec<String> {
        let output = path.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect()
    }
}

#[async_trait]
impl SinkLauncher for ProcessLauncher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn launch(&self, path: &Path) -> Result<Box<dyn SegmentSink>> {
        let mut command = Command::new(&self.config.program);
        command
            .args(self.args_for(path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| PipelineError::launch(path, e))?;
        let stdin = child.stdin.take().ok_or_else(|| {
            PipelineError::launch(path, std::io::Error::other("sink stdin not captured"))
        })?;

        let stderr_task = child.stderr.take().map(|stderr| {
            let tool = self.name.clone();
            let segment = path.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(tool = %tool, segment = %segment, "{}", line.trim_end());
                }
            })
        });

        tracing::debug!(
            tool = %self.name,
            segment = %path.display(),
            pid = child.id().unwrap_or(0),
            "sink process started"
        );

        Ok(Box::new(ProcessSink {
            path: path.to_path_buf(),
            child,
            stdin: BufWriter::with_capacity(self.buffer_size, stdin),
            stderr_task,
        }))
    }
}

struct ProcessSink {
    path: PathBuf,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stderr_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl SegmentSink for ProcessSink {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stdin
            .write_all(bytes)
            .await
            .map_err(|e| PipelineError::sink(&self.path, e))
    }

    async fn flush(&mut self) -> Result<()> {
        self.stdin
            .flush()
            .await
            .map_err(|e| PipelineError::sink(&self.path, e))
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        let ProcessSink {
            path,
            mut child,
            mut stdin,
            stderr_task,
        } = *self;

        // Closing stdin is the end-of-input signal
        let closed = stdin.shutdown().await;
        drop(stdin);

        let status = child
            .wait()
            .await
            .map_err(|e| PipelineError::sink(&path, e))?;
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        if !status.success() {
            return Err(PipelineError::sink_exit(&path, status));
        }
        closed.map_err(|e| PipelineError::sink(&path, e))
    }
}

// ============================================================================
// Plain file
// ============================================================================

/// Writes the JSON array straight to the segment path
#[derive(Debug, Clone)]
pub struct FileLauncher {
    buffer_size: usize,
}

impl FileLauncher {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }
}

#[async_trait]
impl SinkLauncher for FileLauncher {
    fn name(&self) -> &str {
        "file"
    }

    async fn launch(&self, path: &Path) -> Result<Box<dyn SegmentSink>> {
        let file = File::create(path)
            .await
            .map_err(|e| PipelineError::launch(path, e))?;
        Ok(Box::new(FileSink {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(self.buffer_size, file),
        }))
    }
}

struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

#[async_trait]
impl SegmentSink for FileSink {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| PipelineError::sink(&self.path, e))
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|e| PipelineError::sink(&self.path, e))
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| PipelineError::sink(&self.path, e))
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
