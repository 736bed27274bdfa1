//! Stage contracts
//!
//! Every stage is a function of `(Session snapshot, StageContext)` returning
//! a typed output. Stages are stateless with respect to each other; the
//! pipeline engine is the only writer to the session. Only the search and
//! purchase stages perform I/O, and they do it through the connector seam
//! their implementations hold.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Re-export CancellationToken for convenience
pub use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;
use crate::types::{
    ConfirmationOutcome, Decision, InfoAnswer, Intent, Notification, Plan, PurchaseResult,
    Ranking, RunId, SearchHits, Session, SessionId, StageId, StageStatus,
};

/// Typed output of one stage invocation.
///
/// The engine checks that a stage returned the variant its identifier
/// declares; a mismatch is rejected as `stage_internal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    Intent(Intent),
    Plan(Plan),
    SearchHits(SearchHits),
    Ranking(Ranking),
    Decision(Decision),
    Confirmation(ConfirmationOutcome),
    Purchase(PurchaseResult),
    Info(InfoAnswer),
    Notice(Notification),
}

impl StageOutput {
    /// The stage identifier this output variant belongs to.
    pub fn expected_stage(&self) -> StageId {
        match self {
            StageOutput::Intent(_) => StageId::IntentExtraction,
            StageOutput::Plan(_) => StageId::TaskPlanning,
            StageOutput::SearchHits(_) => StageId::Search,
            StageOutput::Ranking(_) => StageId::Comparison,
            StageOutput::Decision(_) => StageId::Decision,
            StageOutput::Confirmation(_) => StageId::AwaitConfirmation,
            StageOutput::Purchase(_) => StageId::Purchase,
            StageOutput::Info(_) => StageId::QueryInfo,
            StageOutput::Notice(_) => StageId::Notification,
        }
    }
}

/// Stage failure.
///
/// Stage-internal errors end the run; retry is a purchase-executor concern,
/// never an engine one.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage timed out after {0:?}")]
    Timeout(Duration),

    #[error("run cancelled")]
    Cancelled,

    #[error("confirmation window elapsed")]
    ConfirmationTimeout,

    #[error("no connectors available: {0}")]
    NoConnectors(String),

    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("malformed stage output: {0}")]
    Malformed(String),

    #[error("journal write failed: {0}")]
    Journal(String),

    #[error("internal stage error: {0}")]
    Internal(String),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Timeout(_) => ErrorKind::StageTimeout,
            StageError::Cancelled => ErrorKind::UserCancelled,
            StageError::ConfirmationTimeout => ErrorKind::ConfirmationTimeout,
            StageError::NoConnectors(_) => ErrorKind::NoConnectorsAvailable,
            StageError::Overloaded(_) => ErrorKind::Overloaded,
            StageError::Journal(_) => ErrorKind::JournalFailure,
            StageError::Malformed(_) | StageError::Internal(_) => ErrorKind::StageInternal,
        }
    }
}

/// Per-invocation context handed to a stage.
///
/// Construction-time dependencies (connectors, stores, classifiers) live in
/// the stage implementations themselves; the context carries only run-scoped
/// data.
#[derive(Clone)]
pub struct StageContext {
    pub session_id: SessionId,
    pub run_id: RunId,
    /// Cancellation scoped to this run; stages at I/O must abort on it.
    pub cancel: CancellationToken,
    /// Remaining budget for this invocation, when the engine bounded it.
    pub deadline: Option<Duration>,
}

impl StageContext {
    pub fn new(session_id: impl Into<SessionId>, run_id: impl Into<RunId>) -> Self {
        Self {
            session_id: session_id.into(),
            run_id: run_id.into(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Stage trait - a deterministic unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Canonical identifier of this stage.
    fn id(&self) -> StageId;

    /// Run the stage against a consistent session snapshot.
    async fn run(&self, session: &Session, ctx: &StageContext) -> Result<StageOutput, StageError>;

    /// Recoverable stages record their error and let the run continue so a
    /// terminal notification can still be composed.
    fn recoverable(&self) -> bool {
        false
    }
}

/// Lookup table of stage implementations keyed by identifier.
#[derive(Default)]
pub struct StageSet {
    stages: HashMap<StageId, Arc<dyn Stage>>,
}

impl StageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.id(), stage);
    }

    pub fn get(&self, id: StageId) -> Option<Arc<dyn Stage>> {
        self.stages.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<StageId> {
        self.stages.keys().copied().collect()
    }
}

/// One progress event emitted by the engine for a stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageUpdate {
    pub session_id: SessionId,
    pub run_id: RunId,
    pub stage_id: StageId,
    pub status: StageStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl StageUpdate {
    pub fn new(
        session_id: impl Into<SessionId>,
        run_id: impl Into<RunId>,
        stage_id: StageId,
        status: StageStatus,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            run_id: run_id.into(),
            stage_id,
            status,
            message: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Sink for engine progress: stage transitions, checkpoints, cancellation.
///
/// The runtime implements this to mirror updates into the session store,
/// the checkpoint journal, and the event bus. Sink failures are logged, not
/// propagated; the journal seam reports its own fatal errors.
#[async_trait]
pub trait StageEventSink: Send + Sync {
    /// A stage changed status. Called in pipeline order.
    async fn stage_update(&self, update: &StageUpdate) -> Result<(), String>;

    /// A stage completed; persist the session checkpoint.
    async fn checkpoint(&self, session: &Session, run_id: &RunId) -> Result<(), String>;

    /// The run was cancelled before reaching a terminal stage.
    async fn run_cancelled(&self, session_id: &SessionId, run_id: &RunId) -> Result<(), String>;
}

/// No-op sink for tests and detached execution.
pub struct NoopEventSink;

#[async_trait]
impl StageEventSink for NoopEventSink {
    async fn stage_update(&self, _update: &StageUpdate) -> Result<(), String> {
        Ok(())
    }

    async fn checkpoint(&self, _session: &Session, _run_id: &RunId) -> Result<(), String> {
        Ok(())
    }

    async fn run_cancelled(
        &self,
        _session_id: &SessionId,
        _run_id: &RunId,
    ) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_expected_stage_mapping() {
        let output = StageOutput::Intent(Intent::info());
        assert_eq!(output.expected_stage(), StageId::IntentExtraction);

        let output = StageOutput::Confirmation(ConfirmationOutcome::rejected());
        assert_eq!(output.expected_stage(), StageId::AwaitConfirmation);
    }

    #[test]
    fn test_stage_error_kinds() {
        assert_eq!(
            StageError::Timeout(Duration::from_secs(5)).kind(),
            ErrorKind::StageTimeout
        );
        assert_eq!(
            StageError::NoConnectors("all failed".into()).kind(),
            ErrorKind::NoConnectorsAvailable
        );
        assert_eq!(
            StageError::Malformed("wrong variant".into()).kind(),
            ErrorKind::StageInternal
        );
    }

    #[test]
    fn test_stage_update_serialization() {
        let update = StageUpdate::new("s1", "r1", StageId::Search, StageStatus::Processing)
            .with_message("searching");
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["stage_id"], "search");
        assert_eq!(value["status"], "processing");
        assert_eq!(value["message"], "searching");
    }
}
