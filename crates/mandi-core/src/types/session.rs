//! Session and Run state
//!
//! A Session is the conversational identity: it survives across runs and
//! accumulates stage outputs. A Run is one end-to-end pipeline execution for
//! one user utterance. At most one run per session is active at a time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::StageOutput;

use super::intent::IntentKind;

/// Type alias for Session ID
pub type SessionId = String;

/// Type alias for Run ID
pub type RunId = String;

/// Canonical pipeline stage identifiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    IntentExtraction,
    TaskPlanning,
    Search,
    Comparison,
    Decision,
    AwaitConfirmation,
    Purchase,
    QueryInfo,
    Notification,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::IntentExtraction => "intent_extraction",
            StageId::TaskPlanning => "task_planning",
            StageId::Search => "search",
            StageId::Comparison => "comparison",
            StageId::Decision => "decision",
            StageId::AwaitConfirmation => "await_confirmation",
            StageId::Purchase => "purchase",
            StageId::QueryInfo => "query_info",
            StageId::Notification => "notification",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Idle,
    Processing,
    Complete,
    Error,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Complete | StageStatus::Error | StageStatus::Skipped
        )
    }
}

/// Per-stage bookkeeping within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageState {
    pub fn idle() -> Self {
        Self {
            status: StageStatus::Idle,
            message: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl Default for StageState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Which branch of the pipeline this session's latest run took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Unknown,
    Purchase,
    Info,
}

impl Default for PathKind {
    fn default() -> Self {
        PathKind::Unknown
    }
}

impl From<IntentKind> for PathKind {
    fn from(kind: IntentKind) -> Self {
        match kind {
            IntentKind::Purchase => PathKind::Purchase,
            IntentKind::Info | IntentKind::Clarify => PathKind::Info,
        }
    }
}

/// Conversational identity plus accumulated stage outputs.
///
/// Outputs are append-only within one run; a new run replaces them. Fields
/// and the BTreeMap key order are the snapshot encoding, so the layout here
/// must stay deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub current_stage: Option<StageId>,
    #[serde(default)]
    pub path: PathKind,
    #[serde(default)]
    pub request_text: String,
    /// Completed stage outputs for the current run.
    #[serde(default)]
    pub outputs: BTreeMap<StageId, StageOutput>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_updated: now,
            current_stage: None,
            path: PathKind::Unknown,
            request_text: String::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Reset per-run state when a new user utterance arrives.
    pub fn begin_turn(&mut self, request_text: impl Into<String>) {
        self.request_text = request_text.into();
        self.current_stage = None;
        self.path = PathKind::Unknown;
        self.outputs.clear();
        self.touch();
    }

    /// Record a completed stage output.
    pub fn apply_output(&mut self, stage: StageId, output: StageOutput) {
        if let StageOutput::Intent(intent) = &output {
            self.path = PathKind::from(intent.kind);
        }
        self.current_stage = Some(stage);
        self.outputs.insert(stage, output);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn intent(&self) -> Option<&super::Intent> {
        match self.outputs.get(&StageId::IntentExtraction) {
            Some(StageOutput::Intent(intent)) => Some(intent),
            _ => None,
        }
    }

    pub fn search_hits(&self) -> Option<&super::SearchHits> {
        match self.outputs.get(&StageId::Search) {
            Some(StageOutput::SearchHits(hits)) => Some(hits),
            _ => None,
        }
    }

    pub fn ranking(&self) -> Option<&super::Ranking> {
        match self.outputs.get(&StageId::Comparison) {
            Some(StageOutput::Ranking(ranking)) => Some(ranking),
            _ => None,
        }
    }

    pub fn decision(&self) -> Option<&super::Decision> {
        match self.outputs.get(&StageId::Decision) {
            Some(StageOutput::Decision(decision)) => Some(decision),
            _ => None,
        }
    }

    pub fn confirmation(&self) -> Option<&super::ConfirmationOutcome> {
        match self.outputs.get(&StageId::AwaitConfirmation) {
            Some(StageOutput::Confirmation(outcome)) => Some(outcome),
            _ => None,
        }
    }

    pub fn purchase_result(&self) -> Option<&super::PurchaseResult> {
        match self.outputs.get(&StageId::Purchase) {
            Some(StageOutput::Purchase(result)) => Some(result),
            _ => None,
        }
    }
}

/// One end-to-end pipeline execution for one user utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub stage_states: BTreeMap<StageId, StageState>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub awaiting_confirmation: bool,
}

impl Run {
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            started_at: Utc::now(),
            stage_states: BTreeMap::new(),
            cancel_requested: false,
            awaiting_confirmation: false,
        }
    }

    pub fn stage_status(&self, stage: StageId) -> StageStatus {
        self.stage_states
            .get(&stage)
            .map(|s| s.status)
            .unwrap_or(StageStatus::Idle)
    }

    pub fn record_stage(
        &mut self,
        stage: StageId,
        status: StageStatus,
        message: Option<String>,
    ) {
        let state = self.stage_states.entry(stage).or_default();
        let now = Utc::now();
        if status == StageStatus::Processing {
            state.started_at = Some(now);
        }
        if status.is_terminal() {
            state.finished_at = Some(now);
        }
        state.status = status;
        state.message = message;
    }
}
