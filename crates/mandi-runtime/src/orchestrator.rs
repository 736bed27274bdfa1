//! Orchestrator - sessions in, runs out
//!
//! Translates one inbound utterance into a run: creates/resumes the session,
//! supersedes any active run, drives the pipeline on a spawned task, and
//! parks the caller until the run either finishes or blocks on a user
//! confirmation. Progress flows through the runtime sink into the session
//! store, the checkpoint journal, and the event bus.

use std::sync::Arc;

use async_trait::async_trait;

use mandi_core::pipeline::{Pipeline, PipelineEngine, RunContext, RunOutcome, StageTimeouts};
use mandi_core::stage::{StageEventSink, StageSet, StageUpdate};
use mandi_core::types::{Run, RunId, Session, SessionId};
use mandi_stores::{AuditRecord, CheckpointEntry, Event, StoreError, Subscription};

use crate::confirmation::RunPhase;
use crate::services::RuntimeServices;
use crate::stages::build_stage_set;

/// Orchestrator errors surfaced to transports.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("no active run for session {0}")]
    NoActiveRun(String),

    #[error("no confirmation pending for run {0}")]
    NoConfirmationPending(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// What a transport learns after submitting or confirming.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: SessionId,
    pub run_id: RunId,
    /// True when the run is parked on a confirmation gate.
    pub awaiting_confirmation: bool,
    /// Terminal outcome; None while the run is still parked.
    pub outcome: Option<RunOutcome>,
    /// Consistent session snapshot at report time.
    pub session: Session,
    /// Stage bookkeeping for the reported run.
    pub run: Option<Run>,
}

/// Orchestrator - wires stores + connectors + engine for the fixed pipeline.
pub struct Orchestrator {
    services: Arc<RuntimeServices>,
    engine: Arc<PipelineEngine>,
    pipeline: Arc<Pipeline>,
    stages: Arc<StageSet>,
}

impl Orchestrator {
    pub fn new(services: Arc<RuntimeServices>, timeouts: StageTimeouts) -> Self {
        let stages = Arc::new(build_stage_set(services.clone()));
        Self {
            services,
            engine: Arc::new(PipelineEngine::new(timeouts)),
            pipeline: Arc::new(Pipeline::standard()),
            stages,
        }
    }

    pub fn services(&self) -> &Arc<RuntimeServices> {
        &self.services
    }

    /// Handle one user utterance end to end.
    ///
    /// Returns when the run reaches a terminal state or parks on the
    /// confirmation gate; in the latter case the report carries the ranked
    /// list and decision produced so far.
    pub async fn handle_message(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<RunReport, RuntimeError> {
        if session_id.trim().is_empty() {
            return Err(RuntimeError::BadRequest("session_id is required".to_string()));
        }
        if message.trim().is_empty() {
            return Err(RuntimeError::BadRequest("message is required".to_string()));
        }

        self.services.sessions.get_or_create(session_id).await;
        let (run, cancel) = self.services.sessions.start_run(session_id, message).await;
        let mut phase_rx = self.services.run_watch.begin(session_id, &run.run_id);

        self.spawn_driver(session_id.to_string(), run.run_id.clone(), cancel);

        loop {
            let phase = phase_rx.borrow_and_update().clone();
            match phase {
                RunPhase::AwaitingConfirmation => {
                    return self.report(session_id, &run.run_id, true, None).await;
                }
                RunPhase::Finished(outcome) => {
                    return self
                        .report(session_id, &run.run_id, false, Some(outcome))
                        .await;
                }
                RunPhase::Running => {
                    if phase_rx.changed().await.is_err() {
                        return Err(RuntimeError::Internal(
                            "run driver dropped its phase watch".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Deliver a confirmation answer and wait for the run to move on.
    pub async fn confirm(
        &self,
        session_id: &str,
        accepted: bool,
        selected_index: Option<usize>,
    ) -> Result<RunReport, RuntimeError> {
        let run = self
            .services
            .sessions
            .active_run(session_id)
            .await
            .ok_or_else(|| RuntimeError::NoActiveRun(session_id.to_string()))?;

        let Some((watched_run, mut phase_rx)) = self.services.run_watch.subscribe(session_id)
        else {
            return Err(RuntimeError::NoActiveRun(session_id.to_string()));
        };
        if watched_run != run.run_id {
            return Err(RuntimeError::NoActiveRun(session_id.to_string()));
        }

        // Mark the current phase seen before delivering, so the next change
        // observed is a consequence of this confirmation.
        let _ = phase_rx.borrow_and_update();
        let outcome = mandi_core::types::ConfirmationOutcome {
            accepted,
            selected_index,
        };
        if !self.services.confirmations.deliver(&run.run_id, outcome) {
            return Err(RuntimeError::NoConfirmationPending(run.run_id.clone()));
        }

        loop {
            if phase_rx.changed().await.is_err() {
                return Err(RuntimeError::Internal(
                    "run driver dropped its phase watch".to_string(),
                ));
            }
            let phase = phase_rx.borrow_and_update().clone();
            match phase {
                RunPhase::Finished(outcome) => {
                    return self
                        .report(session_id, &run.run_id, false, Some(outcome))
                        .await;
                }
                // A high-risk purchase re-entered the gate.
                RunPhase::AwaitingConfirmation => {
                    return self.report(session_id, &run.run_id, true, None).await;
                }
                RunPhase::Running => continue,
            }
        }
    }

    /// Cancel the active run for a session.
    pub async fn cancel(&self, session_id: &str) -> bool {
        self.services.sessions.cancel_run(session_id).await
    }

    /// Deliver a user-supplied OTP code for a pending token.
    pub fn deliver_otp(&self, token: &str, code: String) -> bool {
        self.services.otp.deliver(token, code)
    }

    /// Session snapshot with completed stage outputs only.
    pub async fn session_snapshot(&self, session_id: &str) -> Option<Session> {
        self.services.sessions.session(session_id).await
    }

    /// The active run's bookkeeping, if any.
    pub async fn active_run(&self, session_id: &str) -> Option<Run> {
        self.services.sessions.active_run(session_id).await
    }

    /// Subscribe to a session's realtime events.
    pub async fn subscribe_events(&self, session_id: &str) -> Subscription {
        self.services.bus.subscribe(session_id).await
    }

    /// Audit journal in insertion order, for the history surface.
    pub async fn audit_records(&self) -> Result<Vec<AuditRecord>, RuntimeError> {
        Ok(self.services.audit.scan().await?)
    }

    /// Evict idle sessions and drop their event channels.
    pub async fn sweep_idle_sessions(&self) {
        for session_id in self.services.sessions.evict_idle().await {
            self.services.bus.remove_session(&session_id).await;
        }
    }

    fn spawn_driver(
        &self,
        session_id: String,
        run_id: String,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        let services = self.services.clone();
        let engine = self.engine.clone();
        let pipeline = self.pipeline.clone();
        let stages = self.stages.clone();

        tokio::spawn(async move {
            let mut session = match services.sessions.session(&session_id).await {
                Some(session) => session,
                None => {
                    tracing::error!(session_id = %session_id, "session vanished before run start");
                    services.run_watch.set(
                        &session_id,
                        &run_id,
                        RunPhase::Finished(RunOutcome::Cancelled),
                    );
                    return;
                }
            };

            let sink = Arc::new(RuntimeEventSink {
                services: services.clone(),
            });
            let ctx = RunContext {
                session_id: session_id.clone(),
                run_id: run_id.clone(),
                cancel,
                sink,
            };

            tracing::info!(
                session_id = %session_id,
                run_id = %run_id,
                request = %truncate_for_log(&session.request_text, 200),
                "run started"
            );
            let outcome = engine.run(&pipeline, &stages, &mut session, &ctx).await;
            tracing::info!(
                session_id = %session_id,
                run_id = %run_id,
                outcome = ?outcome,
                "run finished"
            );

            services.sessions.finish_run(&session_id, &run_id).await;
            services
                .run_watch
                .set(&session_id, &run_id, RunPhase::Finished(outcome));
        });
    }

    async fn report(
        &self,
        session_id: &str,
        run_id: &str,
        awaiting_confirmation: bool,
        outcome: Option<RunOutcome>,
    ) -> Result<RunReport, RuntimeError> {
        let session = self
            .services
            .sessions
            .session(session_id)
            .await
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))?;
        let run = match self.services.sessions.active_run(session_id).await {
            Some(run) if run.run_id == run_id => Some(run),
            _ => self
                .services
                .sessions
                .last_run(session_id)
                .await
                .filter(|run| run.run_id == run_id),
        };
        Ok(RunReport {
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            awaiting_confirmation,
            outcome,
            session,
            run,
        })
    }
}

/// Mirrors engine progress into the store, the journal, and the bus.
struct RuntimeEventSink {
    services: Arc<RuntimeServices>,
}

#[async_trait]
impl StageEventSink for RuntimeEventSink {
    async fn stage_update(&self, update: &StageUpdate) -> Result<(), String> {
        self.services
            .sessions
            .update_stage(
                &update.session_id,
                &update.run_id,
                update.stage_id,
                update.status,
                update.message.clone(),
            )
            .await;
        self.services
            .bus
            .publish(&update.session_id, Event::stage_update(update.clone()))
            .await
            .map_err(|e| e.to_string())
    }

    async fn checkpoint(&self, session: &Session, run_id: &RunId) -> Result<(), String> {
        self.services
            .sessions
            .commit_session(&session.id, run_id, session.clone())
            .await;

        let Some(stage_id) = session.current_stage else {
            return Ok(());
        };
        let snapshot = serde_json::to_value(session).map_err(|e| e.to_string())?;
        self.services
            .journal
            .record(CheckpointEntry::new(&session.id, run_id, stage_id, snapshot))
            .await
            .map_err(|e| e.to_string())
    }

    async fn run_cancelled(&self, session_id: &SessionId, run_id: &RunId) -> Result<(), String> {
        self.services
            .bus
            .publish(session_id, Event::run_cancelled(session_id, run_id))
            .await
            .map_err(|e| e.to_string())
    }
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let count = input.chars().count();
    if count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", count));
    preview
}
