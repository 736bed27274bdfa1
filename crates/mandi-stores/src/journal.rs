//! CheckpointJournal - append-only terminal-stage records
//!
//! One record per terminal stage per run, newline-delimited JSON. The
//! journal is the pluggable persistence seam: the file implementation is the
//! shipping default, the in-memory one backs tests and ephemeral setups.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mandi_core::types::{RunId, SessionId, StageId};

use crate::StoreError;

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub ts: DateTime<Utc>,
    pub session_id: SessionId,
    pub run_id: RunId,
    pub stage_id: StageId,
    /// Full session snapshot at this checkpoint.
    pub session: Value,
}

impl CheckpointEntry {
    pub fn new(
        session_id: impl Into<SessionId>,
        run_id: impl Into<RunId>,
        stage_id: StageId,
        session: Value,
    ) -> Self {
        Self {
            ts: Utc::now(),
            session_id: session_id.into(),
            run_id: run_id.into(),
            stage_id,
            session,
        }
    }
}

/// Journal trait - append-only with in-order scan.
#[async_trait]
pub trait CheckpointJournal: Send + Sync {
    /// Append one record, durable at least to the OS buffer on return.
    async fn record(&self, entry: CheckpointEntry) -> Result<(), StoreError>;

    /// Replay all records in insertion order.
    async fn scan(&self) -> Result<Vec<CheckpointEntry>, StoreError>;
}

/// NDJSON file journal.
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJournal {
    /// Open (or create) the journal file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointJournal for FileJournal {
    async fn record(&self, entry: CheckpointEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<CheckpointEntry>, StoreError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

/// In-memory journal for development and testing.
#[derive(Default)]
pub struct InMemoryJournal {
    entries: Mutex<Vec<CheckpointEntry>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointJournal for InMemoryJournal {
    async fn record(&self, entry: CheckpointEntry) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .push(entry);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<CheckpointEntry>, StoreError> {
        Ok(self
            .entries
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .clone())
    }
}
