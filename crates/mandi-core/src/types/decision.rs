//! Decision output types
//!
//! The decision stage applies policy to a ranking and either selects a
//! product (with fallbacks) or declines with a reason. Decisions are
//! immutable once produced.

use serde::{Deserialize, Serialize};

use super::product::Product;

/// Policies and special handling applied while deciding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyFlag {
    InStock,
    PriceSanity,
    DeliveryMeetsUrgency,
    /// No candidate met the urgent threshold; lowest eta won instead.
    UrgentEtaFallback,
    Budget,
    ConnectorHealth,
    Diversity,
    AutoBuy,
}

/// Outcome of the decision stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Winning product, or None when no candidate passed policy.
    pub selected: Option<Product>,
    /// Up to two policy-passing alternatives tried if the winner fails.
    #[serde(default)]
    pub fallbacks: Vec<Product>,
    /// Plain-language explanation of the choice (or refusal).
    pub reasoning: String,
    #[serde(default)]
    pub policy_flags: Vec<PolicyFlag>,
    /// High urgency with a clear winner: skip the confirmation gate.
    #[serde(default)]
    pub auto_buy: bool,
}

impl Decision {
    pub fn declined(reasoning: impl Into<String>) -> Self {
        Self {
            selected: None,
            fallbacks: Vec::new(),
            reasoning: reasoning.into(),
            policy_flags: Vec::new(),
            auto_buy: false,
        }
    }

    pub fn made(&self) -> bool {
        self.selected.is_some()
    }
}

/// User reply delivered into an awaiting confirmation gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationOutcome {
    pub accepted: bool,
    /// Index into the ranked list the user picked, when they picked one.
    #[serde(default)]
    pub selected_index: Option<usize>,
}

impl ConfirmationOutcome {
    pub fn accepted(selected_index: Option<usize>) -> Self {
        Self {
            accepted: true,
            selected_index,
        }
    }

    pub fn rejected() -> Self {
        Self {
            accepted: false,
            selected_index: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declined_decision_is_not_made() {
        let decision = Decision::declined("no candidate passed policy");
        assert!(!decision.made());
        assert!(decision.fallbacks.is_empty());
    }

    #[test]
    fn test_policy_flag_serialization() {
        assert_eq!(
            serde_json::to_value(PolicyFlag::DeliveryMeetsUrgency).unwrap(),
            serde_json::json!("delivery_meets_urgency")
        );
    }
}
