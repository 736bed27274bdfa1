//! Task planning stage
//!
//! The planner is authoritative about which branch runs, but branching is
//! selection over the fixed node list: the plan records the stages this run
//! expects, and the node predicates enforce it.

use async_trait::async_trait;

use mandi_core::stage::{Stage, StageContext, StageError, StageOutput};
use mandi_core::types::{IntentKind, Plan, Session, StageId};

pub struct TaskPlanningStage;

#[async_trait]
impl Stage for TaskPlanningStage {
    fn id(&self) -> StageId {
        StageId::TaskPlanning
    }

    async fn run(
        &self,
        session: &Session,
        _ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let intent = session
            .intent()
            .ok_or_else(|| StageError::Internal("planning before intent extraction".to_string()))?;

        let plan = match intent.kind {
            IntentKind::Purchase => Plan::new(
                format!(
                    "find and buy {} across configured platforms",
                    intent.item.as_deref().unwrap_or("the requested item")
                ),
                vec![
                    StageId::Search,
                    StageId::Comparison,
                    StageId::Decision,
                    StageId::AwaitConfirmation,
                    StageId::Purchase,
                    StageId::Notification,
                ],
            ),
            IntentKind::Info | IntentKind::Clarify => Plan::new(
                "answer from the knowledge base",
                vec![StageId::QueryInfo, StageId::Notification],
            ),
        };

        tracing::info!(
            session_id = %session.id,
            steps = plan.stages.len(),
            summary = %plan.summary,
            "plan created"
        );
        Ok(StageOutput::Plan(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mandi_core::stage::StageOutput;
    use mandi_core::types::Intent;

    #[test]
    fn test_purchase_plan_includes_commerce_stages() {
        tokio_test::block_on(async {
            let mut session = Session::new("s1");
            session.apply_output(
                StageId::IntentExtraction,
                StageOutput::Intent(Intent::purchase("milk")),
            );

            let ctx = StageContext::new("s1", "r1");
            let output = TaskPlanningStage.run(&session, &ctx).await.unwrap();
            let StageOutput::Plan(plan) = output else {
                panic!("expected plan output");
            };
            assert!(plan.includes(StageId::Search));
            assert!(plan.includes(StageId::Purchase));
            assert!(!plan.includes(StageId::QueryInfo));
        });
    }

    #[test]
    fn test_info_plan_routes_to_knowledge_lookup() {
        tokio_test::block_on(async {
            let mut session = Session::new("s1");
            session.apply_output(
                StageId::IntentExtraction,
                StageOutput::Intent(Intent::info()),
            );

            let ctx = StageContext::new("s1", "r1");
            let output = TaskPlanningStage.run(&session, &ctx).await.unwrap();
            let StageOutput::Plan(plan) = output else {
                panic!("expected plan output");
            };
            assert_eq!(plan.stages, vec![StageId::QueryInfo, StageId::Notification]);
        });
    }

    #[test]
    fn test_planning_without_intent_fails() {
        tokio_test::block_on(async {
            let session = Session::new("s1");
            let ctx = StageContext::new("s1", "r1");
            let err = TaskPlanningStage.run(&session, &ctx).await.unwrap_err();
            assert!(matches!(err, StageError::Internal(_)));
        });
    }
}
