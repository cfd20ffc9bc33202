//! Deduplicating document store
//!
//! An append-only JSON-lines file with a unique index. The key of a document
//! is the SHA-256 of its `_id` when present, otherwise of the configured
//! unique fields (missing fields count as null). Keys of documents already
//! in the file are loaded at open, so restarts do not re-insert findings.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use capline_config::StoreConfig;

use super::{DeliveryStats, ResultSink};
use crate::csv::ID_KEY;
use crate::error::ResultSinkError;
use crate::trigger::AnalysisReport;

struct StoreState {
    file: File,
    keys: HashSet<String>,
}

/// JSON-lines document store with unique-key suppression
pub struct DocumentStore {
    name: String,
    path: PathBuf,
    unique_keys: Vec<String>,
    state: Mutex<StoreState>,
}

impl DocumentStore {
    /// Open (or create) the store and index its existing documents
    pub async fn open(config: &StoreConfig) -> Result<Self, ResultSinkError> {
        let path = config.path.clone();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ResultSinkError::store(&path, e))?;
        }

        let keys = load_keys(&path, &config.unique_keys).await?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| ResultSinkError::store(&path, e))?;

        tracing::info!(
            path = %path.display(),
            documents = keys.len(),
            "document store opened"
        );

        Ok(Self {
            name: format!("store:{}", path.display()),
            path,
            unique_keys: config.unique_keys.clone(),
            state: Mutex::new(StoreState { file, keys }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct documents stored
    pub async fn len(&self) -> usize {
        self.state.lock().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Unique key of a document
pub fn document_key(document: &Value, unique_keys: &[String]) -> String {
    let mut hasher = Sha256::new();
    match document.get(ID_KEY) {
        Some(id) => hasher.update(id.to_string().as_bytes()),
        None => {
            let fields: Vec<Value> = unique_keys
                .iter()
                .map(|k| document.get(k).cloned().unwrap_or(Value::Null))
                .collect();
            hasher.update(Value::Array(fields).to_string().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

async fn load_keys(path: &Path, unique_keys: &[String]) -> Result<HashSet<String>, ResultSinkError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(ResultSinkError::store(path, e)),
    };

    let mut keys = HashSet::new();
    let mut skipped = 0usize;
    for line in String::from_utf8_lossy(&bytes).lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(document) => {
                keys.insert(document_key(&document, unique_keys));
            }
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(path = %path.display(), skipped, "unreadable lines in document store");
    }
    Ok(keys)
}

#[async_trait]
impl ResultSink for DocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, report: &AnalysisReport) -> Result<DeliveryStats, ResultSinkError> {
        let parsed = report.documents();
        let mut stats = DeliveryStats {
            errors: parsed.malformed as u64,
            ..DeliveryStats::default()
        };

        let mut state = self.state.lock().await;
        let mut buf = Vec::new();
        let mut fresh = Vec::new();
        for document in &parsed.documents {
            let key = document_key(document, &self.unique_keys);
            if state.keys.contains(&key) || fresh.contains(&key) {
                stats.duplicates += 1;
                continue;
            }
            if serde_json::to_writer(&mut buf, document).is_err() {
                stats.errors += 1;
                continue;
            }
            buf.push(b'\n');
            fresh.push(key);
        }

        if !buf.is_empty() {
            state
                .file
                .write_all(&buf)
                .await
                .map_err(|e| ResultSinkError::store(&self.path, e))?;
            state
                .file
                .flush()
                .await
                .map_err(|e| ResultSinkError::store(&self.path, e))?;
        }

        stats.delivered = fresh.len() as u64;
        state.keys.extend(fresh);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capline_config::OutputFormat;
    use serde_json::json;
    use tempfile::TempDir;

    fn report(lines: &[&str]) -> AnalysisReport {
        AnalysisReport {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            ..AnalysisReport::empty("trace_00.pcapng", OutputFormat::JsonLines)
        }
    }

    fn config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("db").join("alerts.jsonl"),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_key_prefers_id() {
        let keys = vec!["msg".to_string()];
        let a = document_key(&json!({"_id": "x", "msg": "a"}), &keys);
        let b = document_key(&json!({"_id": "x", "msg": "b"}), &keys);
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_from_unique_fields() {
        let keys = vec!["timestamp".to_string(), "msg".to_string()];
        let a = document_key(&json!({"timestamp": "t1", "msg": "scan", "extra": 1}), &keys);
        let b = document_key(&json!({"timestamp": "t1", "msg": "scan", "extra": 2}), &keys);
        let c = document_key(&json!({"timestamp": "t2", "msg": "scan"}), &keys);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_duplicates_counted_not_written() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(&config(&dir)).await.unwrap();

        let line = r#"{"timestamp":"t1","msg":"scan","src_ap":"10.0.0.1:80"}"#;
        let stats = store.deliver(&report(&[line, line, "oops"])).await.unwrap();
        assert_eq!(stats, DeliveryStats { delivered: 1, duplicates: 1, errors: 1 });

        let stats = store.deliver(&report(&[line])).await.unwrap();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(store.len().await, 1);

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_existing_documents_indexed_on_open() {
        let dir = TempDir::new().unwrap();
        let line = r#"{"timestamp":"t1","msg":"scan","src_ap":"a"}"#;
        {
            let store = DocumentStore::open(&config(&dir)).await.unwrap();
            store.deliver(&report(&[line])).await.unwrap();
        }

        let store = DocumentStore::open(&config(&dir)).await.unwrap();
        assert_eq!(store.len().await, 1);
        let stats = store.deliver(&report(&[line])).await.unwrap();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.duplicates, 1);
    }
}
