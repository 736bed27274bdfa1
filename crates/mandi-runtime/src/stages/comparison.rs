//! Comparison stage
//!
//! Pure ranking over the merged search hits, parameterized by the configured
//! weights and the registry's rolling connector health.

use std::sync::Arc;

use async_trait::async_trait;

use mandi_core::ranking::rank;
use mandi_core::stage::{Stage, StageContext, StageError, StageOutput};
use mandi_core::types::{Session, StageId};

use crate::services::RuntimeServices;

pub struct ComparisonStage {
    services: Arc<RuntimeServices>,
}

impl ComparisonStage {
    pub fn new(services: Arc<RuntimeServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for ComparisonStage {
    fn id(&self) -> StageId {
        StageId::Comparison
    }

    async fn run(
        &self,
        session: &Session,
        _ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let hits = session
            .search_hits()
            .ok_or_else(|| StageError::Internal("comparison before search".to_string()))?;

        let products = hits.products().into_iter().cloned().collect();
        let health = self.services.registry.health_map().await;
        let ranking = rank(products, &health, &self.services.tuning.rank_weights);

        tracing::info!(
            session_id = %session.id,
            candidates = ranking.len(),
            top_score = ranking.top().map(|r| r.score).unwrap_or(0.0),
            "candidates ranked"
        );
        Ok(StageOutput::Ranking(ranking))
    }
}
