//! Plan and terminal-output types
//!
//! A Plan is the ordered list of stage identifiers the planner selected for
//! this run. Branching is expressed by node predicates, so the plan is a
//! statement of intent rather than a graph.

use serde::{Deserialize, Serialize};

use super::session::StageId;

/// Ordered stage selection for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Human-readable summary of what this run will do.
    pub summary: String,
    /// Stages the planner expects to execute, in order.
    pub stages: Vec<StageId>,
}

impl Plan {
    pub fn new(summary: impl Into<String>, stages: Vec<StageId>) -> Self {
        Self {
            summary: summary.into(),
            stages,
        }
    }

    pub fn includes(&self, stage: StageId) -> bool {
        self.stages.contains(&stage)
    }
}

/// Answer produced by the knowledge-lookup stage on the info path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoAnswer {
    pub answer: String,
    /// Number of knowledge sources consulted.
    #[serde(default)]
    pub sources_used: usize,
}

impl InfoAnswer {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources_used: 0,
        }
    }

    pub fn with_sources(mut self, sources_used: usize) -> Self {
        self.sources_used = sources_used;
        self
    }
}

/// Terminal user-facing message composed by the notification stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Plain-language message for the user.
    pub message: String,
    /// Outcome label (ordered, cancelled, no_suitable_option, info, ...).
    pub outcome: String,
}

impl Notification {
    pub fn new(outcome: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            outcome: outcome.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_includes() {
        let plan = Plan::new(
            "info lookup",
            vec![
                StageId::IntentExtraction,
                StageId::TaskPlanning,
                StageId::QueryInfo,
                StageId::Notification,
            ],
        );
        assert!(plan.includes(StageId::QueryInfo));
        assert!(!plan.includes(StageId::Purchase));
    }
}
