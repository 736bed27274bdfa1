//! Decision stage
//!
//! Applies the policy gate to the ranking. A declined decision is a valid
//! output, not an error; the confirmation and purchase nodes skip themselves
//! through their predicates.

use std::sync::Arc;

use async_trait::async_trait;

use mandi_core::policy::{decide, DecisionInputs};
use mandi_core::stage::{Stage, StageContext, StageError, StageOutput};
use mandi_core::types::{Session, StageId};

use crate::services::RuntimeServices;

pub struct DecisionStage {
    services: Arc<RuntimeServices>,
}

impl DecisionStage {
    pub fn new(services: Arc<RuntimeServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for DecisionStage {
    fn id(&self) -> StageId {
        StageId::Decision
    }

    async fn run(
        &self,
        session: &Session,
        _ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let ranking = session
            .ranking()
            .ok_or_else(|| StageError::Internal("decision before comparison".to_string()))?;
        let intent = session
            .intent()
            .ok_or_else(|| StageError::Internal("decision before intent extraction".to_string()))?;

        let unhealthy = self
            .services
            .registry
            .unhealthy(self.services.tuning.policies.min_connector_health)
            .await;
        let inputs = DecisionInputs {
            ranking,
            intent,
            budget: self.services.user.budget,
            unhealthy_connectors: unhealthy,
        };
        let decision = decide(&inputs, &self.services.tuning.policies);

        tracing::info!(
            session_id = %session.id,
            made = decision.made(),
            auto_buy = decision.auto_buy,
            fallbacks = decision.fallbacks.len(),
            reasoning = %decision.reasoning,
            "decision taken"
        );
        Ok(StageOutput::Decision(decision))
    }
}
