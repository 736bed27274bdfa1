//! Ranking - pure scoring over a candidate set
//!
//! Score is a weighted sum of three components, each normalized into [0, 1]
//! within the candidate set: delivery speed (smaller eta better), price
//! (cheaper better), and reliability (connector health times product
//! rating). Ties break by lower eta, then lower price, then insertion order.
//!
//! Re-running over the same inputs yields the same ranking; downstream
//! decisions stay reproducible from a session snapshot.

use std::collections::HashMap;

use crate::types::{Product, RankedProduct, Ranking, ScoreComponents};

/// Neutral rating used when a connector reports no product rating.
const NEUTRAL_RATING: f64 = 2.5;

/// Weights for the three score components. They are normalized before use,
/// so callers may pass any positive magnitudes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankWeights {
    pub delivery: f64,
    pub price: f64,
    pub reliability: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            delivery: 0.40,
            price: 0.35,
            reliability: 0.25,
        }
    }
}

impl RankWeights {
    fn normalized(&self) -> Self {
        let sum = self.delivery + self.price + self.reliability;
        if sum <= f64::EPSILON {
            return Self::default();
        }
        Self {
            delivery: self.delivery / sum,
            price: self.price / sum,
            reliability: self.reliability / sum,
        }
    }
}

/// Rank candidates by weighted score, descending.
///
/// `connector_health` maps connector id to a [0, 1] health figure; unknown
/// connectors count as fully healthy.
pub fn rank(
    products: Vec<Product>,
    connector_health: &HashMap<String, f64>,
    weights: &RankWeights,
) -> Ranking {
    if products.is_empty() {
        return Ranking::default();
    }
    let weights = weights.normalized();

    let min_eta = products
        .iter()
        .map(|p| p.delivery_eta_minutes)
        .min()
        .unwrap_or(0) as f64;
    let max_eta = products
        .iter()
        .map(|p| p.delivery_eta_minutes)
        .max()
        .unwrap_or(0) as f64;
    let min_price = products
        .iter()
        .map(|p| p.unit_price)
        .fold(f64::INFINITY, f64::min);
    let max_price = products
        .iter()
        .map(|p| p.unit_price)
        .fold(f64::NEG_INFINITY, f64::max);

    let normalize_inverse = |value: f64, min: f64, max: f64| -> f64 {
        if (max - min).abs() <= f64::EPSILON {
            1.0
        } else {
            1.0 - (value - min) / (max - min)
        }
    };

    let mut ranked: Vec<(usize, RankedProduct)> = products
        .into_iter()
        .enumerate()
        .map(|(index, product)| {
            let delivery =
                normalize_inverse(product.delivery_eta_minutes as f64, min_eta, max_eta);
            let price = normalize_inverse(product.unit_price, min_price, max_price);
            let health = connector_health
                .get(&product.connector_id)
                .copied()
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            let rating = product.rating.unwrap_or(NEUTRAL_RATING).clamp(0.0, 5.0) / 5.0;
            let reliability = health * rating;

            let components = ScoreComponents {
                delivery,
                price,
                reliability,
            };
            let score = weights.delivery * delivery
                + weights.price * price
                + weights.reliability * reliability;

            (
                index,
                RankedProduct {
                    product,
                    score,
                    components,
                },
            )
        })
        .collect();

    ranked.sort_by(|(ia, a), (ib, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.product
                    .delivery_eta_minutes
                    .cmp(&b.product.delivery_eta_minutes),
            )
            .then(
                a.product
                    .unit_price
                    .partial_cmp(&b.product.unit_price)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(ia.cmp(ib))
    });

    Ranking {
        ranked: ranked.into_iter().map(|(_, r)| r).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(connector: &str, id: &str, price: f64, eta: u32, rating: Option<f64>) -> Product {
        Product {
            connector_id: connector.to_string(),
            external_id: id.to_string(),
            title: id.to_string(),
            unit_price: price,
            currency: "INR".to_string(),
            delivery_eta_minutes: eta,
            rating,
            stock: Some(10),
            url: format!("https://{}.example/{}", connector, id),
            raw: json!({}),
        }
    }

    #[test]
    fn test_delivery_weighted_defaults_prefer_fast_connector() {
        // Mirrors the classic fast-vs-slow split: fast is pricier but
        // delivers six times sooner.
        let ranking = rank(
            vec![
                product("fast", "milk-1", 60.0, 15, Some(4.0)),
                product("slow", "milk-2", 55.0, 90, Some(4.0)),
            ],
            &HashMap::new(),
            &RankWeights::default(),
        );
        assert_eq!(ranking.top().unwrap().product.connector_id, "fast");
        assert!(ranking.ranked[0].score > ranking.ranked[1].score);
    }

    #[test]
    fn test_single_candidate_scores_full_marks_on_normalized_axes() {
        let ranking = rank(
            vec![product("fast", "only", 42.0, 20, None)],
            &HashMap::new(),
            &RankWeights::default(),
        );
        let top = ranking.top().unwrap();
        assert_eq!(top.components.delivery, 1.0);
        assert_eq!(top.components.price, 1.0);
    }

    #[test]
    fn test_ties_break_by_eta_then_price_then_insertion() {
        let weights = RankWeights {
            delivery: 0.0,
            price: 0.0,
            reliability: 1.0,
        };
        // Identical reliability everywhere: scores tie, order falls through
        // the tie-break chain.
        let ranking = rank(
            vec![
                product("a", "late", 10.0, 60, Some(4.0)),
                product("b", "early-pricey", 12.0, 30, Some(4.0)),
                product("c", "early-cheap", 10.0, 30, Some(4.0)),
            ],
            &HashMap::new(),
            &weights,
        );
        let ids: Vec<&str> = ranking
            .ranked
            .iter()
            .map(|r| r.product.external_id.as_str())
            .collect();
        assert_eq!(ids, vec!["early-cheap", "early-pricey", "late"]);
    }

    #[test]
    fn test_connector_health_lowers_reliability() {
        let mut health = HashMap::new();
        health.insert("flaky".to_string(), 0.2);
        let ranking = rank(
            vec![
                product("flaky", "p1", 50.0, 30, Some(5.0)),
                product("steady", "p2", 50.0, 30, Some(5.0)),
            ],
            &health,
            &RankWeights::default(),
        );
        assert_eq!(ranking.top().unwrap().product.connector_id, "steady");
    }

    #[test]
    fn test_weights_need_not_sum_to_one() {
        let raw = RankWeights {
            delivery: 4.0,
            price: 3.5,
            reliability: 2.5,
        };
        let defaults = RankWeights::default();
        let products = vec![
            product("fast", "a", 60.0, 15, Some(4.0)),
            product("slow", "b", 55.0, 90, Some(4.0)),
        ];
        let lhs = rank(products.clone(), &HashMap::new(), &raw);
        let rhs = rank(products, &HashMap::new(), &defaults);
        assert_eq!(
            lhs.top().unwrap().product.external_id,
            rhs.top().unwrap().product.external_id
        );
        assert!((lhs.top().unwrap().score - rhs.top().unwrap().score).abs() < 1e-9);
    }

    #[test]
    fn test_empty_candidates_rank_empty() {
        let ranking = rank(Vec::new(), &HashMap::new(), &RankWeights::default());
        assert!(ranking.is_empty());
    }
}
