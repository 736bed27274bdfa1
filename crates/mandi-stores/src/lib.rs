//! # Mandi Stores
//!
//! State and fact storage for the orchestrator:
//! - SessionStore: per-session single-writer state with run lifecycle and
//!   snapshot/restore
//! - SessionEventBus: per-session realtime fan-out with bounded
//!   per-subscriber buffers
//! - CheckpointJournal: append-only NDJSON journal of terminal stage records
//! - AuditLog: single-writer append-only journal of transactional actions
//!
//! The journal persists facts; the bus pushes the same facts to live
//! subscribers. Late subscribers receive only future events.

mod audit;
mod event_bus;
mod journal;
mod session;

pub use audit::{AuditLog, AuditRecord, AuditRecordDraft, Durability};
pub use event_bus::{Event, SessionEventBus, Subscription};
pub use journal::{CheckpointEntry, CheckpointJournal, FileJournal, InMemoryJournal};
pub use session::{SessionStore, SessionStoreConfig};

use thiserror::Error;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("stale run: {0}")]
    StaleRun(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
