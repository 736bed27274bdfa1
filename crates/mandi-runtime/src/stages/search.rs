//! Search stage
//!
//! Hands the intent to the connector fan-out and absorbs per-connector
//! failures into the hit map. Only the empty-registry and all-failed cases
//! error the stage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use mandi_core::stage::{Stage, StageContext, StageError, StageOutput};
use mandi_core::types::{Session, StageId};
use mandi_connectors::{FanoutError, SearchQuery};

use crate::services::RuntimeServices;

const DEFAULT_SEARCH_BUDGET: Duration = Duration::from_secs(10);

pub struct SearchStage {
    services: Arc<RuntimeServices>,
}

impl SearchStage {
    pub fn new(services: Arc<RuntimeServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for SearchStage {
    fn id(&self) -> StageId {
        StageId::Search
    }

    async fn run(&self, session: &Session, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let intent = session
            .intent()
            .ok_or_else(|| StageError::Internal("search before intent extraction".to_string()))?;
        let item = intent
            .item
            .as_deref()
            .ok_or_else(|| StageError::Malformed("purchase intent without an item".to_string()))?;

        let query = SearchQuery::new(item, intent.quantity).with_hints(json!({
            "urgency": intent.urgency,
            "language": intent.language_tag,
        }));
        let budget = ctx.deadline.unwrap_or(DEFAULT_SEARCH_BUDGET);

        let hits = self
            .services
            .fanout
            .search(&query, budget, &ctx.cancel)
            .await
            .map_err(|err| match err {
                FanoutError::NoConnectors(detail) => StageError::NoConnectors(detail),
                FanoutError::Overloaded(detail) => StageError::Overloaded(detail),
                FanoutError::Cancelled => StageError::Cancelled,
            })?;

        tracing::info!(
            session_id = %session.id,
            connectors = hits.connectors_answered(),
            products = hits.products().len(),
            "search fan-out merged"
        );
        Ok(StageOutput::SearchHits(hits))
    }
}
