//! Pipeline engine
//!
//! A pipeline is an ordered list of nodes, each a stage identifier plus a
//! predicate over the session. A node runs iff its predicate holds;
//! otherwise the stage is marked skipped and the engine moves on. Branching
//! is selection over a fixed node list, which keeps the engine linear,
//! deterministic, and checkpointable.
//!
//! For each node the engine emits `processing`, invokes the stage under its
//! deadline, records `complete`/`error`, emits the update, and checkpoints.
//! Cancellation is honoured at every stage boundary and propagated into
//! stages blocked in I/O through the run's cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;
use crate::stage::{
    Stage, StageContext, StageError, StageEventSink, StageOutput, StageSet, StageUpdate,
};
use crate::types::{IntentKind, RunId, Session, SessionId, StageId, StageStatus};

/// Predicate deciding whether a node runs for this session.
pub type NodePredicate = Arc<dyn Fn(&Session) -> bool + Send + Sync>;

/// One pipeline node: a stage gated by a predicate.
#[derive(Clone)]
pub struct PipelineNode {
    pub stage_id: StageId,
    predicate: NodePredicate,
}

impl PipelineNode {
    /// Node that always runs.
    pub fn always(stage_id: StageId) -> Self {
        Self {
            stage_id,
            predicate: Arc::new(|_| true),
        }
    }

    /// Node gated by a predicate over the session snapshot.
    pub fn when<F>(stage_id: StageId, predicate: F) -> Self
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        Self {
            stage_id,
            predicate: Arc::new(predicate),
        }
    }

    pub fn should_run(&self, session: &Session) -> bool {
        (self.predicate)(session)
    }
}

/// Ordered, predicate-gated stage list.
#[derive(Clone)]
pub struct Pipeline {
    pub name: String,
    pub nodes: Vec<PipelineNode>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, nodes: Vec<PipelineNode>) -> Self {
        Self {
            name: name.into(),
            nodes,
        }
    }

    /// The fixed conversational-commerce pipeline.
    ///
    /// The purchase branch (`search` onward) requires a purchase intent; the
    /// info branch requires anything else. The confirmation gate is skipped
    /// for auto-buy decisions, and the purchase node requires either an
    /// accepted confirmation or auto-buy. Notification always runs.
    pub fn standard() -> Self {
        let wants_purchase =
            |session: &Session| session.intent().map(|i| i.wants_purchase()).unwrap_or(false);

        Self::new(
            "conversational_commerce",
            vec![
                PipelineNode::always(StageId::IntentExtraction),
                PipelineNode::always(StageId::TaskPlanning),
                PipelineNode::when(StageId::Search, wants_purchase),
                PipelineNode::when(StageId::Comparison, wants_purchase),
                PipelineNode::when(StageId::Decision, wants_purchase),
                PipelineNode::when(StageId::AwaitConfirmation, |session| {
                    session
                        .decision()
                        .map(|d| d.made() && !d.auto_buy)
                        .unwrap_or(false)
                }),
                PipelineNode::when(StageId::Purchase, |session| {
                    let Some(decision) = session.decision() else {
                        return false;
                    };
                    if !decision.made() {
                        return false;
                    }
                    decision.auto_buy
                        || session
                            .confirmation()
                            .map(|c| c.accepted)
                            .unwrap_or(false)
                }),
                PipelineNode::when(StageId::QueryInfo, |session| {
                    session
                        .intent()
                        .map(|i| i.kind != IntentKind::Purchase)
                        .unwrap_or(false)
                }),
                PipelineNode::always(StageId::Notification),
            ],
        )
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.nodes.iter().map(|n| n.stage_id).collect()
    }
}

/// Per-stage invocation deadlines.
///
/// `await_confirmation` carries no engine deadline; the stage enforces the
/// configured confirmation window itself so its timeout surfaces as
/// `confirmation_timeout` rather than `stage_timeout`.
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    overrides: HashMap<StageId, Duration>,
}

impl StageTimeouts {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, stage: StageId, timeout: Duration) -> Self {
        self.overrides.insert(stage, timeout);
        self
    }

    /// Deadline for one stage, None when the stage self-limits.
    pub fn deadline(&self, stage: StageId) -> Option<Duration> {
        if let Some(overridden) = self.overrides.get(&stage) {
            return Some(*overridden);
        }
        match stage {
            StageId::IntentExtraction | StageId::TaskPlanning => Some(Duration::from_secs(5)),
            StageId::Search => Some(Duration::from_secs(10)),
            StageId::Comparison | StageId::Decision => Some(Duration::from_secs(5)),
            StageId::Purchase => Some(Duration::from_secs(60)),
            StageId::QueryInfo | StageId::Notification => Some(Duration::from_secs(5)),
            StageId::AwaitConfirmation => None,
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::new()
    }
}

/// Run-scoped context for one engine invocation.
pub struct RunContext {
    pub session_id: SessionId,
    pub run_id: RunId,
    pub cancel: CancellationToken,
    pub sink: Arc<dyn StageEventSink>,
}

/// Terminal outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every selected stage completed (some may have been skipped).
    Completed,
    /// A stage failed; recoverable failures still reach notification but
    /// surface here as the run's disposition.
    Failed {
        stage_id: StageId,
        kind: ErrorKind,
        message: String,
    },
    /// The run was cancelled before reaching a terminal stage.
    Cancelled,
}

impl RunOutcome {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

/// The engine - walks the node list for one run.
pub struct PipelineEngine {
    pub timeouts: StageTimeouts,
}

impl PipelineEngine {
    pub fn new(timeouts: StageTimeouts) -> Self {
        Self { timeouts }
    }

    /// Execute `pipeline` over `session`, mutating it in place.
    ///
    /// The caller owns the working session copy; every mutation is mirrored
    /// out through the sink so the session store stays authoritative.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        stages: &StageSet,
        session: &mut Session,
        ctx: &RunContext,
    ) -> RunOutcome {
        let mut first_failure: Option<(StageId, ErrorKind, String)> = None;

        for node in &pipeline.nodes {
            if ctx.cancel.is_cancelled() {
                return self.finish_cancelled(ctx).await;
            }

            let stage_id = node.stage_id;
            if !node.should_run(session) {
                self.emit(
                    ctx,
                    StageUpdate::new(&ctx.session_id, &ctx.run_id, stage_id, StageStatus::Skipped),
                )
                .await;
                continue;
            }

            let Some(stage) = stages.get(stage_id) else {
                let message = format!("stage '{}' not registered", stage_id);
                tracing::error!(
                    session_id = %ctx.session_id,
                    run_id = %ctx.run_id,
                    stage = %stage_id,
                    "stage missing from stage set"
                );
                self.emit(
                    ctx,
                    StageUpdate::new(&ctx.session_id, &ctx.run_id, stage_id, StageStatus::Error)
                        .with_message(message.clone()),
                )
                .await;
                return RunOutcome::Failed {
                    stage_id,
                    kind: ErrorKind::StageInternal,
                    message,
                };
            };

            self.emit(
                ctx,
                StageUpdate::new(
                    &ctx.session_id,
                    &ctx.run_id,
                    stage_id,
                    StageStatus::Processing,
                ),
            )
            .await;

            let result = self.invoke_stage(stage.as_ref(), session, ctx, stage_id).await;

            match result {
                Ok(output) => {
                    if output.expected_stage() != stage_id {
                        let message = format!(
                            "stage '{}' returned output for '{}'",
                            stage_id,
                            output.expected_stage()
                        );
                        self.emit(
                            ctx,
                            StageUpdate::new(
                                &ctx.session_id,
                                &ctx.run_id,
                                stage_id,
                                StageStatus::Error,
                            )
                            .with_message(message.clone()),
                        )
                        .await;
                        return RunOutcome::Failed {
                            stage_id,
                            kind: ErrorKind::StageInternal,
                            message,
                        };
                    }

                    let data = serde_json::to_value(&output).ok();
                    session.apply_output(stage_id, output);
                    tracing::info!(
                        session_id = %ctx.session_id,
                        run_id = %ctx.run_id,
                        stage = %stage_id,
                        "stage completed"
                    );

                    let mut update = StageUpdate::new(
                        &ctx.session_id,
                        &ctx.run_id,
                        stage_id,
                        StageStatus::Complete,
                    );
                    if let Some(data) = data {
                        update = update.with_data(data);
                    }
                    self.emit(ctx, update).await;

                    if let Err(err) = ctx.sink.checkpoint(session, &ctx.run_id).await {
                        tracing::error!(
                            session_id = %ctx.session_id,
                            run_id = %ctx.run_id,
                            stage = %stage_id,
                            error = %err,
                            "checkpoint write failed"
                        );
                        return RunOutcome::Failed {
                            stage_id,
                            kind: ErrorKind::JournalFailure,
                            message: err,
                        };
                    }
                }
                Err(StageError::Cancelled) => {
                    return self.finish_cancelled(ctx).await;
                }
                Err(err) => {
                    let kind = err.kind();
                    let message = err.to_string();
                    tracing::warn!(
                        session_id = %ctx.session_id,
                        run_id = %ctx.run_id,
                        stage = %stage_id,
                        error = %message,
                        "stage failed"
                    );
                    self.emit(
                        ctx,
                        StageUpdate::new(
                            &ctx.session_id,
                            &ctx.run_id,
                            stage_id,
                            StageStatus::Error,
                        )
                        .with_message(message.clone()),
                    )
                    .await;

                    if stage.recoverable() {
                        if first_failure.is_none() {
                            first_failure = Some((stage_id, kind, message));
                        }
                        continue;
                    }
                    return RunOutcome::Failed {
                        stage_id,
                        kind,
                        message,
                    };
                }
            }
        }

        if ctx.cancel.is_cancelled() {
            return self.finish_cancelled(ctx).await;
        }

        match first_failure {
            Some((stage_id, kind, message)) => RunOutcome::Failed {
                stage_id,
                kind,
                message,
            },
            None => RunOutcome::Completed,
        }
    }

    async fn invoke_stage(
        &self,
        stage: &dyn Stage,
        session: &Session,
        ctx: &RunContext,
        stage_id: StageId,
    ) -> Result<StageOutput, StageError> {
        let deadline = self.timeouts.deadline(stage_id);
        let stage_ctx = {
            let mut c = StageContext::new(&ctx.session_id, &ctx.run_id)
                .with_cancel(ctx.cancel.clone());
            if let Some(d) = deadline {
                c = c.with_deadline(d);
            }
            c
        };

        match deadline {
            Some(budget) => tokio::select! {
                _ = ctx.cancel.cancelled() => Err(StageError::Cancelled),
                outcome = tokio::time::timeout(budget, stage.run(session, &stage_ctx)) => {
                    match outcome {
                        Ok(result) => result,
                        Err(_) => Err(StageError::Timeout(budget)),
                    }
                }
            },
            None => tokio::select! {
                _ = ctx.cancel.cancelled() => Err(StageError::Cancelled),
                result = stage.run(session, &stage_ctx) => result,
            },
        }
    }

    async fn emit(&self, ctx: &RunContext, update: StageUpdate) {
        if let Err(err) = ctx.sink.stage_update(&update).await {
            tracing::warn!(
                session_id = %ctx.session_id,
                run_id = %ctx.run_id,
                error = %err,
                "failed to publish stage update"
            );
        }
    }

    async fn finish_cancelled(&self, ctx: &RunContext) -> RunOutcome {
        tracing::info!(
            session_id = %ctx.session_id,
            run_id = %ctx.run_id,
            "run cancelled"
        );
        if let Err(err) = ctx
            .sink
            .run_cancelled(&ctx.session_id, &ctx.run_id)
            .await
        {
            tracing::warn!(
                session_id = %ctx.session_id,
                run_id = %ctx.run_id,
                error = %err,
                "failed to publish run cancellation"
            );
        }
        RunOutcome::Cancelled
    }
}

impl Default for PipelineEngine {
    fn default() -> Self {
        Self::new(StageTimeouts::default())
    }
}
