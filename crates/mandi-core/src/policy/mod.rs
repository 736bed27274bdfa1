//! Decision policies - pure gate over a ranked candidate list
//!
//! Policies are applied in a fixed order; the first ranked product passing
//! every gate wins, and the next two passing products become fallbacks.
//! When nothing passes, the decision is an explicit decline and the
//! purchase branch is skipped downstream.

use std::collections::BTreeSet;

use crate::types::{Decision, Intent, PolicyFlag, Product, RankedProduct, Ranking, Urgency};

/// Tunable policy thresholds.
#[derive(Debug, Clone)]
pub struct DecisionPolicies {
    /// Max delivery eta accepted for high-urgency requests, in minutes.
    pub urgent_eta_minutes: u32,
    /// Price sanity band around the candidate median, as (low, high) factors.
    pub price_band: (f64, f64),
    /// Score gap over the runner-up that lets a high-urgency run auto-buy.
    pub auto_buy_score_gap: f64,
    /// Connectors below this health figure are disqualified.
    pub min_connector_health: f64,
}

impl Default for DecisionPolicies {
    fn default() -> Self {
        Self {
            urgent_eta_minutes: 60,
            price_band: (0.5, 1.5),
            auto_buy_score_gap: 0.15,
            min_connector_health: 0.5,
        }
    }
}

/// Inputs to one decision.
pub struct DecisionInputs<'a> {
    pub ranking: &'a Ranking,
    pub intent: &'a Intent,
    /// User budget, when one is configured.
    pub budget: Option<f64>,
    /// Connectors flagged unhealthy within the rolling window.
    pub unhealthy_connectors: BTreeSet<String>,
}

/// Apply the policy gate to a ranking and produce a decision.
pub fn decide(inputs: &DecisionInputs<'_>, policies: &DecisionPolicies) -> Decision {
    if inputs.ranking.is_empty() {
        return Decision::declined("no candidates were found on any platform");
    }

    let mut flags = vec![PolicyFlag::InStock, PolicyFlag::PriceSanity];
    let median = median_price(&inputs.ranking.ranked);
    let (band_low, band_high) = policies.price_band;

    // Policies 1-2: stock signal and price sanity.
    let mut survivors: Vec<&RankedProduct> = inputs
        .ranking
        .ranked
        .iter()
        .filter(|r| !r.product.known_out_of_stock())
        .filter(|r| {
            r.product.unit_price >= median * band_low && r.product.unit_price <= median * band_high
        })
        .collect();

    // Policy 3: delivery must meet urgency; fall back to the fastest
    // survivor when nothing is quick enough.
    if inputs.intent.urgency == Urgency::High && !survivors.is_empty() {
        flags.push(PolicyFlag::DeliveryMeetsUrgency);
        let quick: Vec<&RankedProduct> = survivors
            .iter()
            .copied()
            .filter(|r| r.product.delivery_eta_minutes <= policies.urgent_eta_minutes)
            .collect();
        if quick.is_empty() {
            flags.push(PolicyFlag::UrgentEtaFallback);
            let fastest = survivors
                .iter()
                .copied()
                .min_by_key(|r| r.product.delivery_eta_minutes);
            survivors = fastest.into_iter().collect();
        } else {
            survivors = quick;
        }
    }

    // Policy 4: budget.
    if let Some(budget) = inputs.budget {
        flags.push(PolicyFlag::Budget);
        survivors.retain(|r| r.product.unit_price <= budget);
    }

    // Policy 5: connector health.
    if !inputs.unhealthy_connectors.is_empty() {
        flags.push(PolicyFlag::ConnectorHealth);
        survivors.retain(|r| !inputs.unhealthy_connectors.contains(&r.product.connector_id));
    }

    let Some(selected) = survivors.first().map(|r| r.product.clone()) else {
        return Decision::declined(
            "every candidate failed a purchase policy; not placing an order",
        );
    };

    // Policy 6: fallback diversity - prefer alternates on another connector.
    let remaining: Vec<&Product> = survivors.iter().skip(1).map(|r| &r.product).collect();
    let diverse: Vec<&Product> = remaining
        .iter()
        .copied()
        .filter(|p| p.connector_id != selected.connector_id)
        .collect();
    let fallback_pool = if diverse.is_empty() { remaining } else { diverse };
    if !fallback_pool.is_empty() {
        flags.push(PolicyFlag::Diversity);
    }
    let fallbacks: Vec<Product> = fallback_pool.into_iter().take(2).cloned().collect();

    // The gap is judged among the candidates that survived policy, not the
    // raw ranking; a disqualified front-runner cannot vouch for the winner.
    let survivor_gap = match survivors.as_slice() {
        [first, second, ..] => Some(first.score - second.score),
        _ => None,
    };
    let auto_buy = inputs.intent.urgency == Urgency::High
        && survivor_gap
            .map(|gap| gap >= policies.auto_buy_score_gap)
            .unwrap_or(survivors.len() == 1);
    if auto_buy {
        flags.push(PolicyFlag::AutoBuy);
    }

    let reasoning = format!(
        "picked {} on {} at {:.2} {} (eta {} min) out of {} candidates",
        selected.title,
        selected.connector_id,
        selected.unit_price,
        selected.currency,
        selected.delivery_eta_minutes,
        inputs.ranking.len(),
    );

    Decision {
        selected: Some(selected),
        fallbacks,
        reasoning,
        policy_flags: flags,
        auto_buy,
    }
}

fn median_price(ranked: &[RankedProduct]) -> f64 {
    let mut prices: Vec<f64> = ranked.iter().map(|r| r.product.unit_price).collect();
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = prices.len() / 2;
    if prices.len() % 2 == 0 {
        (prices[mid - 1] + prices[mid]) / 2.0
    } else {
        prices[mid]
    }
}
