//! External command analyzer
//!
//! Runs a configured tool once per segment and reads its findings from an
//! output file:
//!
//! ```text
//! segment ──► program args{input} ──► output file ──► AnalysisReport
//!                                          │
//!                                          └── truncated or deleted
//! ```
//!
//! Placeholders are substituted textually: `{input}` is the segment path,
//! `{output}` is the resolved output path, and `{segment}` (output path only)
//! is the segment file stem so concurrent workers do not share a file.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use capline_config::{
    AfterRead, AnalysisConfig, INPUT_PLACEHOLDER, OutputFormat, RESULT_PLACEHOLDER,
    SEGMENT_PLACEHOLDER,
};

use crate::csv;
use crate::error::{AnalysisError, Result};
use crate::trigger::{AnalysisReport, AnalysisTrigger};

/// Number of stderr lines kept in a failure
const STDERR_TAIL_LINES: usize = 8;

/// How long stderr may stay open after the tool exits
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Analyzer backed by an external program
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    name: String,
    program: String,
    args: Vec<String>,
    output: PathBuf,
    format: OutputFormat,
    after_read: AfterRead,
    timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
}

impl CommandAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Self {
        let name = Path::new(&config.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.program.clone());

        Self {
            name,
            program: config.program.clone(),
            args: config.args.clone(),
            output: config.output.clone(),
            format: config.format,
            after_read: config.after_read,
            timeout: config.timeout,
            working_dir: config.working_dir.clone(),
        }
    }

    /// Output file used for `segment`
    pub fn output_path(&self, segment: &Path) -> PathBuf {
        let template = self.output.to_string_lossy();
        if !template.contains(SEGMENT_PLACEHOLDER) {
            return self.output.clone();
        }
        let stem = segment
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        PathBuf::from(template.replace(SEGMENT_PLACEHOLDER, &stem))
    }

    /// Arguments for one run
    pub fn args_for(&self, segment: &Path, output: &Path) -> Vec<String> {
        let input = segment.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(RESULT_PLACEHOLDER, &output)
            })
            .collect()
    }

    async fn run_tool(&self, segment: &Path, output: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(self.args_for(segment, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| AnalysisError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(forward_stderr(
                stderr,
                self.name.clone(),
                segment.display().to_string(),
            ))
        });

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };
        let Some(status) = waited else {
            if let Err(e) = child.kill().await {
                tracing::warn!(analyzer = %self.name, error = %e, "failed to kill timed out tool");
            }
            if let Some(task) = stderr_task {
                task.abort();
            }
            return Err(AnalysisError::Timeout {
                program: self.program.clone(),
                timeout: self.timeout.unwrap_or_default(),
            });
        };
        let status = status?;
        let tail = drain_stderr(stderr_task).await;

        if status.success() {
            return Ok(());
        }

        Err(AnalysisError::ToolFailed {
            program: self.program.clone(),
            status,
            stderr: tail.joined(),
        })
    }

    /// Read non-blank lines from the output file
    ///
    /// A missing file means the tool found nothing.
    async fn collect(&self, output: &Path) -> Result<(Option<String>, Vec<String>)> {
        let bytes = match tokio::fs::read(output).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((None, Vec::new())),
            Err(e) => return Err(AnalysisError::output(output, e)),
        };

        let text = String::from_utf8_lossy(&bytes);
        match self.format {
            OutputFormat::JsonLines => {
                let lines = text
                    .lines()
                    .map(|l| l.trim_end_matches('\r'))
                    .filter(|l| !l.trim().is_empty())
                    .map(String::from)
                    .collect();
                Ok((None, lines))
            }
            OutputFormat::Csv => {
                let mut records = csv::split_records(&text)
                    .map_err(|e| AnalysisError::Csv {
                        path: output.to_path_buf(),
                        source: e,
                    })?
                    .into_iter()
                    .filter(|r| !r.trim().is_empty());
                let header = records.next();
                Ok((header, records.collect()))
            }
        }
    }

    /// Reset the output file so the next run starts clean
    async fn clear(&self, output: &Path) -> Result<()> {
        let cleared = match self.after_read {
            AfterRead::Truncate => match tokio::fs::metadata(output).await {
                Ok(_) => tokio::fs::File::create(output).await.map(|_| ()),
                Err(e) => Err(e),
            },
            AfterRead::Delete => tokio::fs::remove_file(output).await,
        };
        match cleared {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AnalysisError::output(output, e)),
        }
    }
}

#[async_trait]
impl AnalysisTrigger for CommandAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, segment: &Path) -> Result<AnalysisReport> {
        let started = Instant::now();
        let output = self.output_path(segment);

        if let Err(e) = self.run_tool(segment, &output).await {
            // Partial output from a failed run must not leak into the next one
            if let Err(clear_err) = self.clear(&output).await {
                tracing::warn!(
                    analyzer = %self.name,
                    error = %clear_err,
                    "failed to clear output after tool failure"
                );
            }
            return Err(e);
        }

        let (header, lines) = self.collect(&output).await?;
        self.clear(&output).await?;

        tracing::debug!(
            analyzer = %self.name,
            segment = %segment.display(),
            lines = lines.len(),
            "analysis finished"
        );

        Ok(AnalysisReport {
            segment: segment.to_path_buf(),
            format: self.format,
            header,
            lines,
            elapsed: started.elapsed(),
        })
    }
}

/// Stderr lines already forwarded, with the last few kept
#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    forwarded: usize,
}

impl StderrTail {
    fn push(&mut self, line: String) {
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.forwarded += 1;
    }

    fn joined(&self) -> String {
        self.lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Log each stderr line as the tool writes it
async fn forward_stderr<R>(stderr: R, tool: String, segment: String) -> StderrTail
where
    R: AsyncRead + Unpin,
{
    let mut tail = StderrTail::default();
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end().to_string();
        tracing::debug!(tool = %tool, segment = %segment, "{}", line);
        tail.push(line);
    }
    tail
}

/// Wait for the stderr reader after the tool exited
///
/// A background child still holding the pipe must not stall the worker.
async fn drain_stderr(task: Option<JoinHandle<StderrTail>>) -> StderrTail {
    let Some(mut task) = task else {
        return StderrTail::default();
    };
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(tail)) => tail,
        _ => {
            task.abort();
            StderrTail::default()
        }
    }
}

#[cfg(test)]
#[path = "command_test.rs"]
mod command_test;
