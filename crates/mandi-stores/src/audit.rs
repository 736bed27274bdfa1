//! AuditLog - append-only journal of transactional actions
//!
//! A single writer task serializes every append; callers get the assigned
//! record id back only after the line reached at least the OS buffer, and
//! fsync durability on terminal purchase outcomes. Ids are monotonic within
//! a process: a process instance marker plus a sequence number.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use mandi_core::types::{RunId, SessionId};

use crate::StoreError;

/// Durability the caller requires before the append acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Write plus flush to the OS buffer.
    Flush,
    /// Write plus fsync; required for terminal purchase outcomes.
    Fsync,
}

/// One audit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub run_id: RunId,
    pub session_id: SessionId,
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub detail: Value,
}

/// Record fields supplied by the caller; the log assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct AuditRecordDraft {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub actor: String,
    pub action: String,
    pub detail: Value,
}

impl AuditRecordDraft {
    pub fn new(
        session_id: impl Into<SessionId>,
        run_id: impl Into<RunId>,
        actor: impl Into<String>,
        action: impl Into<String>,
        detail: Value,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            actor: actor.into(),
            action: action.into(),
            detail,
        }
    }
}

enum Command {
    Append {
        draft: AuditRecordDraft,
        durability: Durability,
        ack: oneshot::Sender<Result<String, StoreError>>,
    },
    Scan {
        ack: oneshot::Sender<Result<Vec<AuditRecord>, StoreError>>,
    },
}

/// Handle to the single-writer audit journal.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<Command>,
}

impl AuditLog {
    /// Open the audit file and spawn the writer task.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::channel(256);
        let marker = uuid::Uuid::new_v4().simple().to_string();
        let writer = Writer {
            path,
            file,
            marker: marker[..8].to_string(),
            seq: 0,
        };
        tokio::spawn(writer.run(rx));
        Ok(Self { tx })
    }

    /// Append one record and wait for the requested durability.
    pub async fn append(
        &self,
        draft: AuditRecordDraft,
        durability: Durability,
    ) -> Result<String, StoreError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Command::Append {
                draft,
                durability,
                ack,
            })
            .await
            .map_err(|_| StoreError::Internal("audit writer gone".to_string()))?;
        rx.await
            .map_err(|_| StoreError::Internal("audit writer dropped ack".to_string()))?
    }

    /// Replay the journal in insertion order.
    pub async fn scan(&self) -> Result<Vec<AuditRecord>, StoreError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Command::Scan { ack })
            .await
            .map_err(|_| StoreError::Internal("audit writer gone".to_string()))?;
        rx.await
            .map_err(|_| StoreError::Internal("audit writer dropped ack".to_string()))?
    }
}

struct Writer {
    path: PathBuf,
    file: File,
    marker: String,
    seq: u64,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Append {
                    draft,
                    durability,
                    ack,
                } => {
                    let result = self.append(draft, durability);
                    let _ = ack.send(result);
                }
                Command::Scan { ack } => {
                    let _ = ack.send(self.scan());
                }
            }
        }
    }

    fn append(
        &mut self,
        draft: AuditRecordDraft,
        durability: Durability,
    ) -> Result<String, StoreError> {
        self.seq += 1;
        let id = format!("{}-{:08}", self.marker, self.seq);
        let record = AuditRecord {
            id: id.clone(),
            ts: Utc::now(),
            run_id: draft.run_id,
            session_id: draft.session_id,
            actor: draft.actor,
            action: draft.action,
            detail: draft.detail,
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;
        if durability == Durability::Fsync {
            self.file.sync_all()?;
        }
        Ok(id)
    }

    fn scan(&self) -> Result<Vec<AuditRecord>, StoreError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}
