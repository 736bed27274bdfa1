//! Await-confirmation stage
//!
//! Blocks the run on a one-shot confirmation channel keyed by run id. The
//! configured window converts absence into an implicit rejection surfaced as
//! `confirmation_timeout`; the stage is recoverable so the notification
//! stage can still tell the user what happened.

use std::sync::Arc;

use async_trait::async_trait;

use mandi_core::stage::{Stage, StageContext, StageError, StageOutput};
use mandi_core::types::{ConfirmationOutcome, Session, StageId};
use mandi_stores::Event;

use crate::services::RuntimeServices;

pub struct AwaitConfirmationStage {
    services: Arc<RuntimeServices>,
}

impl AwaitConfirmationStage {
    pub fn new(services: Arc<RuntimeServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for AwaitConfirmationStage {
    fn id(&self) -> StageId {
        StageId::AwaitConfirmation
    }

    fn recoverable(&self) -> bool {
        true
    }

    async fn run(&self, session: &Session, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let decision = session
            .decision()
            .ok_or_else(|| StageError::Internal("confirmation before decision".to_string()))?;
        let selected = decision
            .selected
            .as_ref()
            .ok_or_else(|| StageError::Internal("confirmation without a selection".to_string()))?;

        let rx = self.services.confirmations.register(&ctx.run_id);
        self.services
            .sessions
            .set_awaiting_confirmation(&ctx.session_id, &ctx.run_id, true)
            .await;
        self.services.run_watch.set(
            &ctx.session_id,
            &ctx.run_id,
            crate::confirmation::RunPhase::AwaitingConfirmation,
        );

        let detail = format!(
            "confirm order: {} on {} at {:.2} {} (eta {} min)",
            selected.title,
            selected.connector_id,
            selected.unit_price,
            selected.currency,
            selected.delivery_eta_minutes,
        );
        if let Err(err) = self
            .services
            .bus
            .publish(
                &ctx.session_id,
                Event::confirmation_required(&ctx.session_id, &ctx.run_id, detail),
            )
            .await
        {
            tracing::warn!(
                session_id = %ctx.session_id,
                error = %err,
                "failed to publish confirmation request"
            );
        }

        let window = self.services.tuning.confirmation_timeout;
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(StageError::Cancelled),
            answered = tokio::time::timeout(window, rx) => match answered {
                Ok(Ok(outcome)) => Ok(StageOutput::Confirmation(outcome)),
                // A replaced or dropped waiter reads as rejection.
                Ok(Err(_)) => Ok(StageOutput::Confirmation(ConfirmationOutcome::rejected())),
                Err(_) => Err(StageError::ConfirmationTimeout),
            },
        };

        self.services.confirmations.forget(&ctx.run_id);
        self.services
            .sessions
            .set_awaiting_confirmation(&ctx.session_id, &ctx.run_id, false)
            .await;
        self.services.run_watch.set(
            &ctx.session_id,
            &ctx.run_id,
            crate::confirmation::RunPhase::Running,
        );
        result
    }
}
