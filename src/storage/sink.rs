// src/storage/sink.rs

//! Downstream sink and archival boundaries.
//!
//! The engine forwards records and archives raw payloads through these
//! traits; the transport behind them (message queue, document store) lives
//! outside this repository. File-backed implementations are provided so a
//! local run is operable end to end.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::models::Record;
use crate::utils::{ChecksumAlgorithm, fingerprint};

/// Destination for new or changed records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Forward one record; returns a correlation id for traceability.
    async fn forward(&self, record: &Record) -> Result<String>;
}

/// Optional raw-content archive.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Persist one payload; returns its archive id.
    async fn archive(&self, payload: &[u8], content_type: &str) -> Result<String>;
}

/// Appends each record as one JSON line to a local file.
pub struct JsonlSink {
    path: PathBuf,
    // serializes appends so concurrent workers never interleave lines
    write_lock: Mutex<()>,
    seq: AtomicU64,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
        }
    }

    fn next_correlation_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("rec-{}-{}", Utc::now().timestamp_millis(), seq)
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn forward(&self, record: &Record) -> Result<String> {
        let correlation_id = self.next_correlation_id();
        let line = serde_json::to_string(&serde_json::json!({
            "correlation_id": correlation_id,
            "source_id": record.source_id,
            "timestamp": record.timestamp.to_rfc3339(),
            "content_type": record.content_type,
            "payload": String::from_utf8_lossy(&record.payload),
        }))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let _guard = self.write_lock.lock().expect("sink write lock poisoned");
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        file.flush()?;

        Ok(correlation_id)
    }
}

/// Stores raw payloads in a directory, keyed by content fingerprint.
pub struct DirArchive {
    root: PathBuf,
}

impl DirArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArchiveStore for DirArchive {
    async fn archive(&self, payload: &[u8], _content_type: &str) -> Result<String> {
        let id = fingerprint(ChecksumAlgorithm::Sha256, payload);
        let path = self.root.join(format!("{id}.bin"));
        tokio::fs::create_dir_all(&self.root).await?;

        // Write to temp, then rename, so a crashed write never leaves a
        // half-archived payload under the final name.
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(payload).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        Ok(id)
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything forwarded so far.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().expect("memory sink lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("memory sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn forward(&self, record: &Record) -> Result<String> {
        let mut records = self.records.lock().expect("memory sink lock poisoned");
        records.push(record.clone());
        Ok(format!("mem-{}", records.len()))
    }
}
