//! Analysis trigger seam and report type

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use capline_config::OutputFormat;

use crate::csv;
use crate::error::Result;

/// Runs analysis over one completed segment
#[async_trait]
pub trait AnalysisTrigger: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Analyse the segment at `segment` and return what the tool reported
    async fn analyze(&self, segment: &Path) -> Result<AnalysisReport>;
}

/// Raw findings for one segment
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// Segment the report was produced for
    pub segment: PathBuf,
    pub format: OutputFormat,
    /// CSV header line, if the format has one
    pub header: Option<String>,
    /// Non-empty result lines, header excluded
    ///
    /// A CSV record with quoted line breaks stays one entry.
    pub lines: Vec<String>,
    pub elapsed: Duration,
}

/// Structured documents parsed from a report
#[derive(Debug, Default)]
pub struct Documents {
    pub documents: Vec<Value>,
    /// Lines that could not be parsed
    pub malformed: usize,
}

impl AnalysisReport {
    /// Create an empty report
    pub fn empty(segment: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            segment: segment.into(),
            format,
            header: None,
            lines: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// True if the tool reported nothing
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Parse lines into JSON documents
    ///
    /// JSON-lines output must be one object per line. CSV rows are keyed by
    /// the header; a CSV report without a header yields nothing.
    pub fn documents(&self) -> Documents {
        let mut parsed = Documents::default();
        match self.format {
            OutputFormat::JsonLines => {
                for line in &self.lines {
                    match serde_json::from_str::<Value>(line) {
                        Ok(value @ Value::Object(_)) => parsed.documents.push(value),
                        _ => parsed.malformed += 1,
                    }
                }
            }
            OutputFormat::Csv => {
                let Some(header) = &self.header else {
                    parsed.malformed = self.lines.len();
                    return parsed;
                };
                let text = format!("{header}\n{}", self.lines.join("\n"));
                match csv::documents(&text) {
                    Ok(documents) => parsed.documents = documents,
                    Err(_) => parsed.malformed = self.lines.len(),
                }
            }
        }
        parsed
    }
}
