//! Purchase result types
//!
//! The purchase executor always returns a result; connector failures become
//! `Failed`, risk refusals become `Blocked`. Engine-level errors are reserved
//! for bugs, not merchant behavior.

use serde::{Deserialize, Serialize};

/// Terminal disposition of one purchase attempt chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Success,
    Blocked,
    Failed,
}

/// Risk classification computed before ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a 0-100 risk score onto a level, given the critical threshold.
    pub fn from_score(score: u32, critical_threshold: u32) -> Self {
        if score > critical_threshold {
            RiskLevel::Critical
        } else if score > 60 {
            RiskLevel::High
        } else if score > 30 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Static purchase context for the requesting user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    /// Delivery address passed verbatim to the connector.
    pub delivery_address: String,
    /// Only supported payment path; connectors reject anything else.
    #[serde(default = "default_payment")]
    pub payment_method: String,
    /// Spending cap for this user, when one is configured.
    #[serde(default)]
    pub budget: Option<f64>,
}

fn default_payment() -> String {
    "cash_on_delivery".to_string()
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, delivery_address: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            delivery_address: delivery_address.into(),
            payment_method: default_payment(),
            budget: None,
        }
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Terminal result of the purchase stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub status: PurchaseStatus,
    /// Connector that finally took (or refused) the order.
    #[serde(default)]
    pub platform_used: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default = "default_payment")]
    pub payment_method: String,
    /// Risk score in [0, 100].
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    /// Order attempts made across primary and fallbacks.
    pub attempts: u32,
    pub used_fallback: bool,
    /// Audit record ids written for this purchase, in order.
    #[serde(default)]
    pub audit_ids: Vec<String>,
    /// Plain-language outcome for the notification stage.
    pub user_message: String,
}

impl PurchaseResult {
    pub fn blocked(risk_score: u32, risk_level: RiskLevel, user_message: impl Into<String>) -> Self {
        Self {
            status: PurchaseStatus::Blocked,
            platform_used: None,
            order_id: None,
            payment_method: default_payment(),
            risk_score,
            risk_level,
            attempts: 0,
            used_fallback: false,
            audit_ids: Vec::new(),
            user_message: user_message.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == PurchaseStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_boundaries() {
        assert_eq!(RiskLevel::from_score(0, 80), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30, 80), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(31, 80), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60, 80), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(61, 80), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(80, 80), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(81, 80), RiskLevel::Critical);
    }

    #[test]
    fn test_risk_level_respects_configured_threshold() {
        assert_eq!(RiskLevel::from_score(75, 70), RiskLevel::Critical);
    }

    #[test]
    fn test_blocked_result_shape() {
        let result = PurchaseResult::blocked(90, RiskLevel::Critical, "blocked");
        assert_eq!(result.status, PurchaseStatus::Blocked);
        assert!(!result.succeeded());
        assert_eq!(result.attempts, 0);
    }
}
