//! Risk scoring
//!
//! Factors are additive on a 0-100 scale; the critical threshold is
//! configurable and everything above it blocks the purchase outright.

use serde_json::{json, Value};

/// Observations feeding one risk computation.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskFactors {
    /// Percent change of the re-quoted price against the decided price.
    pub price_delta_pct: f64,
    pub out_of_stock: bool,
    /// Rolling connector health in [0, 1].
    pub platform_health: f64,
    /// Quantity-adjusted order total.
    pub order_total: f64,
    /// Same idempotency key seen within the window.
    pub duplicate_request: bool,
}

/// Additive risk score in [0, 100].
pub fn risk_score(factors: &RiskFactors, budget_large: f64) -> u32 {
    let mut score = 0u32;
    if factors.price_delta_pct >= 50.0 {
        score += 40;
    }
    if factors.out_of_stock {
        score += 20;
    }
    if factors.platform_health < 0.5 {
        score += 20;
    }
    if factors.order_total >= budget_large {
        score += 20;
    }
    if factors.duplicate_request {
        score += 30;
    }
    score.min(100)
}

/// Audit payload for a computed score.
pub fn risk_detail(factors: &RiskFactors, score: u32) -> Value {
    json!({
        "score": score,
        "price_delta_pct": factors.price_delta_pct,
        "out_of_stock": factors.out_of_stock,
        "platform_health": factors.platform_health,
        "order_total": factors.order_total,
        "duplicate_request": factors.duplicate_request,
    })
}
