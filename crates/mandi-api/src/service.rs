//! ApiService - the transport-agnostic surface
//!
//! `RuntimeApi` adapts orchestrator reports into wire DTOs. Event
//! subscriptions pass through untouched; transports frame them however they
//! like.

use std::sync::Arc;

use async_trait::async_trait;

use mandi_core::pipeline::RunOutcome;
use mandi_core::stage::StageOutput;
use mandi_core::types::{Session, StageId};
use mandi_runtime::{Orchestrator, RunReport};
use mandi_stores::{AuditRecord, Subscription};

use crate::dto::{
    CancelRequest, CancelResponse, ChatProcessRequest, ChatProcessResponse, OrderConfirmRequest,
    OrderConfirmResponse, OtpSubmitRequest, OtpSubmitResponse, StageEventView,
};
use crate::error::ApiError;

/// Service surface consumed by the HTTP/WS adapters.
#[async_trait]
pub trait ApiService: Send + Sync {
    async fn process_chat(
        &self,
        request: ChatProcessRequest,
    ) -> Result<ChatProcessResponse, ApiError>;

    async fn confirm_order(
        &self,
        request: OrderConfirmRequest,
    ) -> Result<OrderConfirmResponse, ApiError>;

    async fn cancel(&self, request: CancelRequest) -> Result<CancelResponse, ApiError>;

    /// Session snapshot; completed stage outputs only.
    async fn session(&self, session_id: &str) -> Result<Session, ApiError>;

    /// Audit journal, most recent first.
    async fn history(&self) -> Result<Vec<AuditRecord>, ApiError>;

    async fn submit_otp(&self, request: OtpSubmitRequest) -> Result<OtpSubmitResponse, ApiError>;

    /// Subscribe to a session's realtime events.
    async fn subscribe_events(&self, session_id: &str) -> Subscription;
}

/// ApiService over a local orchestrator.
pub struct RuntimeApi {
    orchestrator: Arc<Orchestrator>,
}

impl RuntimeApi {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ApiService for RuntimeApi {
    async fn process_chat(
        &self,
        request: ChatProcessRequest,
    ) -> Result<ChatProcessResponse, ApiError> {
        let report = self
            .orchestrator
            .handle_message(&request.session_id, &request.message)
            .await?;
        Ok(chat_response_from_report(report))
    }

    async fn confirm_order(
        &self,
        request: OrderConfirmRequest,
    ) -> Result<OrderConfirmResponse, ApiError> {
        let report = self
            .orchestrator
            .confirm(
                &request.session_id,
                request.accepted,
                request.selected_product_index,
            )
            .await?;

        let purchase_result = report.session.purchase_result().cloned();
        let message = terminal_message(&report.session);
        Ok(OrderConfirmResponse {
            success: !matches!(report.outcome, Some(RunOutcome::Failed { .. })),
            awaiting_confirmation: report.awaiting_confirmation,
            purchase_result,
            message,
        })
    }

    async fn cancel(&self, request: CancelRequest) -> Result<CancelResponse, ApiError> {
        let cancelled = self.orchestrator.cancel(&request.session_id).await;
        Ok(CancelResponse { cancelled })
    }

    async fn session(&self, session_id: &str) -> Result<Session, ApiError> {
        self.orchestrator
            .session_snapshot(session_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("session {}", session_id)))
    }

    async fn history(&self) -> Result<Vec<AuditRecord>, ApiError> {
        let mut records = self.orchestrator.audit_records().await?;
        records.reverse();
        Ok(records)
    }

    async fn submit_otp(&self, request: OtpSubmitRequest) -> Result<OtpSubmitResponse, ApiError> {
        let delivered = self.orchestrator.deliver_otp(&request.token, request.code);
        Ok(OtpSubmitResponse { delivered })
    }

    async fn subscribe_events(&self, session_id: &str) -> Subscription {
        self.orchestrator.subscribe_events(session_id).await
    }
}

fn chat_response_from_report(report: RunReport) -> ChatProcessResponse {
    let (success, error) = match &report.outcome {
        None | Some(RunOutcome::Completed) => (true, None),
        Some(RunOutcome::Cancelled) => (false, Some("user_cancelled".to_string())),
        Some(RunOutcome::Failed { kind, .. }) => (false, Some(kind.as_str().to_string())),
    };

    let terminal_stage_events = report
        .run
        .as_ref()
        .map(|run| {
            run.stage_states
                .iter()
                .filter(|(_, state)| state.status.is_terminal())
                .map(|(stage_id, state)| StageEventView {
                    stage_id: *stage_id,
                    status: state.status,
                    message: state.message.clone(),
                    finished_at: state.finished_at,
                })
                .collect()
        })
        .unwrap_or_default();

    ChatProcessResponse {
        success,
        run_id: report.run_id,
        intent: report.session.intent().cloned(),
        plan_summary: match report.session.outputs.get(&StageId::TaskPlanning) {
            Some(StageOutput::Plan(plan)) => Some(plan.summary.clone()),
            _ => None,
        },
        ranked_products: report.session.ranking().map(|r| r.ranked.clone()),
        decision: report.session.decision().cloned(),
        awaiting_confirmation: report.awaiting_confirmation,
        message: terminal_message(&report.session),
        error,
        terminal_stage_events,
    }
}

fn terminal_message(session: &Session) -> Option<String> {
    match session.outputs.get(&StageId::Notification) {
        Some(StageOutput::Notice(notice)) => Some(notice.message.clone()),
        _ => None,
    }
}
