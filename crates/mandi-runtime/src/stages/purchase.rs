//! Purchase stage
//!
//! Thin wrapper over the purchase executor. Merchant failures and risk
//! refusals come back as a complete stage output carrying a failed/blocked
//! result; only bugs and journal trouble error the stage.

use std::sync::Arc;

use async_trait::async_trait;

use mandi_core::stage::{Stage, StageContext, StageError, StageOutput};
use mandi_core::types::{Session, StageId};

use crate::purchase::PurchaseExecutor;
use crate::services::RuntimeServices;

pub struct PurchaseStage {
    executor: PurchaseExecutor,
}

impl PurchaseStage {
    pub fn new(services: Arc<RuntimeServices>) -> Self {
        Self {
            executor: PurchaseExecutor::new(services),
        }
    }
}

#[async_trait]
impl Stage for PurchaseStage {
    fn id(&self) -> StageId {
        StageId::Purchase
    }

    async fn run(&self, session: &Session, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let result = self.executor.execute(session, ctx).await?;
        tracing::info!(
            session_id = %session.id,
            status = ?result.status,
            platform = result.platform_used.as_deref().unwrap_or("-"),
            attempts = result.attempts,
            used_fallback = result.used_fallback,
            risk = result.risk_score,
            "purchase finished"
        );
        Ok(StageOutput::Purchase(result))
    }
}
