//! Ranking output types
//!
//! Produced by the comparison stage. Scores live in [0, 1] and the list is
//! ordered descending; the components are kept for explanation and audit.

use serde::{Deserialize, Serialize};

use super::product::Product;

/// Per-component contributions to a product's score, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    /// Normalized delivery speed, smaller eta is better.
    pub delivery: f64,
    /// Normalized price within the candidate set, cheaper is better.
    pub price: f64,
    /// Connector health combined with the product rating.
    pub reliability: f64,
}

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedProduct {
    pub product: Product,
    pub score: f64,
    pub components: ScoreComponents,
}

/// Descending-score ranking of all candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub ranked: Vec<RankedProduct>,
}

impl Ranking {
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn top(&self) -> Option<&RankedProduct> {
        self.ranked.first()
    }
}
