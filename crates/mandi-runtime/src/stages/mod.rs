//! Stage implementations
//!
//! One module per canonical stage. The natural-language seams (classifier,
//! knowledge base) are traits with deterministic built-in implementations;
//! a deployment may swap in model-backed ones without touching the engine.

mod comparison;
mod confirm;
mod decision;
mod info;
mod intent;
mod notify;
mod planning;
mod purchase;
mod search;

use std::sync::Arc;

use mandi_core::stage::StageSet;

use crate::services::RuntimeServices;

pub use comparison::ComparisonStage;
pub use confirm::AwaitConfirmationStage;
pub use decision::DecisionStage;
pub use info::{KnowledgeBase, QueryInfoStage, StaticKnowledgeBase};
pub use intent::{HeuristicIntentClassifier, IntentClassifier, IntentStage};
pub use notify::NotificationStage;
pub use planning::TaskPlanningStage;
pub use purchase::PurchaseStage;
pub use search::SearchStage;

/// Assemble the full stage set over shared services.
pub fn build_stage_set(services: Arc<RuntimeServices>) -> StageSet {
    let mut stages = StageSet::new();
    stages.register(Arc::new(IntentStage::new(Arc::new(
        HeuristicIntentClassifier::new(),
    ))));
    stages.register(Arc::new(TaskPlanningStage));
    stages.register(Arc::new(SearchStage::new(services.clone())));
    stages.register(Arc::new(ComparisonStage::new(services.clone())));
    stages.register(Arc::new(DecisionStage::new(services.clone())));
    stages.register(Arc::new(AwaitConfirmationStage::new(services.clone())));
    stages.register(Arc::new(PurchaseStage::new(services.clone())));
    stages.register(Arc::new(QueryInfoStage::new(Arc::new(
        StaticKnowledgeBase::with_builtin_entries(),
    ))));
    stages.register(Arc::new(NotificationStage));
    stages
}
