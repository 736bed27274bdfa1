//! Product and search result types
//!
//! Products are immutable once produced by a connector. Search results keep
//! per-connector success/failure so downstream stages can reason about
//! partial coverage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One normalized offer from a merchant connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Connector that produced this offer.
    pub connector_id: String,
    /// Connector-scoped product identifier.
    pub external_id: String,
    pub title: String,
    pub unit_price: f64,
    pub currency: String,
    /// Estimated delivery time in minutes.
    pub delivery_eta_minutes: u32,
    /// Merchant rating in [0, 5], when the connector reports one.
    #[serde(default)]
    pub rating: Option<f64>,
    /// Units in stock, when the connector reports stock.
    #[serde(default)]
    pub stock: Option<u32>,
    pub url: String,
    /// Connector-native payload, kept for audit and debugging.
    #[serde(default)]
    pub raw: Value,
}

impl Product {
    /// Whether a known stock signal says this product is unavailable.
    pub fn known_out_of_stock(&self) -> bool {
        self.stock == Some(0)
    }
}

/// Why one connector contributed no products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFailure {
    /// Stable failure label (timeout, unavailable, rate_limited, ...).
    pub reason: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl SearchFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Merged fan-out result, keyed by connector id.
///
/// A BTreeMap keeps snapshot encoding stable across save/restore cycles.
/// Product order within one connector is the order the connector returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    pub hits: BTreeMap<String, Result<Vec<Product>, SearchFailure>>,
}

impl SearchHits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ok(&mut self, connector_id: impl Into<String>, products: Vec<Product>) {
        self.hits.insert(connector_id.into(), Ok(products));
    }

    pub fn record_err(&mut self, connector_id: impl Into<String>, failure: SearchFailure) {
        self.hits.insert(connector_id.into(), Err(failure));
    }

    /// All products across connectors, in connector-id order then
    /// connector-returned order.
    pub fn products(&self) -> Vec<&Product> {
        self.hits
            .values()
            .filter_map(|r| r.as_ref().ok())
            .flatten()
            .collect()
    }

    /// Connector ids that contributed at least an answer (ok or err).
    pub fn connectors_answered(&self) -> usize {
        self.hits.len()
    }

    /// True when every connector in the map failed.
    pub fn all_failed(&self) -> bool {
        !self.hits.is_empty() && self.hits.values().all(|r| r.is_err())
    }
}
