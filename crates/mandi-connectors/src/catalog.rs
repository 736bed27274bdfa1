//! Static-catalog connector
//!
//! Serves a fixed in-memory catalog. Used for development, dry-run setups,
//! and tests; latency, failure modes, price drift, and OTP demands are all
//! scriptable so the purchase executor's edge cases can be driven end to
//! end without a real merchant.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use mandi_core::types::Product;

use crate::connector::{
    Capability, Connector, ConnectorError, OrderReceipt, OrderRequest, OtpChannel, Quote,
    SearchQuery,
};

const CAPABILITIES: [Capability; 2] = [Capability::Search, Capability::Order];

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub external_id: String,
    pub title: String,
    pub unit_price: f64,
    pub currency: String,
    pub delivery_eta_minutes: u32,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub stock: Option<u32>,
    /// Extra search terms beyond the title (transliterations, synonyms).
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CatalogItem {
    fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        needle
            .split_whitespace()
            .any(|word| {
                self.title.to_lowercase().contains(word)
                    || self.keywords.iter().any(|k| k.to_lowercase() == word)
            })
    }

    fn to_product(&self, connector_id: &str, price_factor: f64) -> Product {
        Product {
            connector_id: connector_id.to_string(),
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            unit_price: self.unit_price * price_factor,
            currency: self.currency.clone(),
            delivery_eta_minutes: self.delivery_eta_minutes,
            rating: self.rating,
            stock: self.stock,
            url: format!("catalog://{}/{}", connector_id, self.external_id),
            raw: json!({ "source": "static_catalog" }),
        }
    }
}

/// Connector over a fixed catalog with scriptable behavior.
pub struct StaticCatalogConnector {
    id: String,
    items: Vec<CatalogItem>,
    latency: Duration,
    search_error: Option<ConnectorError>,
    /// Factor applied to catalog prices when quoting; simulates drift.
    price_factor: Mutex<f64>,
    stock_override: Mutex<Option<u32>>,
    /// Scripted order outcomes, drained front to back; empty means success.
    order_script: Mutex<VecDeque<Result<(), ConnectorError>>>,
    require_otp: bool,
    order_calls: AtomicUsize,
}

impl StaticCatalogConnector {
    pub fn new(id: impl Into<String>, items: Vec<CatalogItem>) -> Self {
        Self {
            id: id.into(),
            items,
            latency: Duration::ZERO,
            search_error: None,
            price_factor: Mutex::new(1.0),
            stock_override: Mutex::new(None),
            order_script: Mutex::new(VecDeque::new()),
            require_otp: false,
            order_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_search_error(mut self, error: ConnectorError) -> Self {
        self.search_error = Some(error);
        self
    }

    pub fn with_otp_required(mut self) -> Self {
        self.require_otp = true;
        self
    }

    /// Queue outcomes for upcoming order calls; once drained, orders succeed.
    pub fn script_orders(&self, outcomes: Vec<Result<(), ConnectorError>>) {
        let mut script = self.order_script.lock().unwrap();
        script.clear();
        script.extend(outcomes);
    }

    /// Shift quoted prices by a factor (1.0 = catalog price).
    pub fn set_price_factor(&self, factor: f64) {
        *self.price_factor.lock().unwrap() = factor;
    }

    /// Force a stock figure on every quote.
    pub fn set_stock(&self, stock: Option<u32>) {
        *self.stock_override.lock().unwrap() = stock;
    }

    /// Order calls observed so far; lets tests assert idempotent suppression.
    pub fn order_calls(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self, deadline: Duration) -> Result<(), ConnectorError> {
        if self.latency.is_zero() {
            return Ok(());
        }
        if self.latency >= deadline {
            tokio::time::sleep(deadline).await;
            return Err(ConnectorError::Unavailable(format!(
                "{} did not answer within {:?}",
                self.id, deadline
            )));
        }
        tokio::time::sleep(self.latency).await;
        Ok(())
    }
}

#[async_trait]
impl Connector for StaticCatalogConnector {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[Capability] {
        &CAPABILITIES
    }

    async fn search(
        &self,
        query: &SearchQuery,
        deadline: Duration,
    ) -> Result<Vec<Product>, ConnectorError> {
        self.simulate_latency(deadline).await?;
        if let Some(error) = &self.search_error {
            return Err(error.clone());
        }
        let factor = *self.price_factor.lock().unwrap();
        Ok(self
            .items
            .iter()
            .filter(|item| item.matches(&query.item))
            .map(|item| item.to_product(&self.id, factor))
            .collect())
    }

    async fn quote(
        &self,
        external_id: &str,
        deadline: Duration,
    ) -> Result<Quote, ConnectorError> {
        self.simulate_latency(deadline).await?;
        let item = self
            .items
            .iter()
            .find(|item| item.external_id == external_id)
            .ok_or_else(|| {
                ConnectorError::Permanent(format!("unknown product '{}'", external_id))
            })?;
        let factor = *self.price_factor.lock().unwrap();
        let stock = self
            .stock_override
            .lock()
            .unwrap()
            .or(item.stock);
        Ok(Quote {
            unit_price: item.unit_price * factor,
            stock,
        })
    }

    async fn order(
        &self,
        request: &OrderRequest,
        otp: &OtpChannel,
        deadline: Duration,
    ) -> Result<OrderReceipt, ConnectorError> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency(deadline).await?;

        if self.require_otp {
            let code = otp
                .request(
                    format!("code for {} on {}", request.product.title, self.id),
                    deadline,
                )
                .await?;
            if code.trim().is_empty() {
                return Err(ConnectorError::Transient("empty otp code".to_string()));
            }
        }

        let scripted = self.order_script.lock().unwrap().pop_front();
        if let Some(outcome) = scripted {
            outcome?;
        }

        Ok(OrderReceipt {
            order_id: format!(
                "{}-{}",
                self.id.to_uppercase(),
                uuid::Uuid::new_v4().simple()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mandi_core::types::UserContext;

    fn chocolate() -> CatalogItem {
        CatalogItem {
            external_id: "choc-1".to_string(),
            title: "Dairy Milk Chocolate".to_string(),
            unit_price: 45.0,
            currency: "INR".to_string(),
            delivery_eta_minutes: 20,
            rating: Some(4.6),
            stock: Some(8),
            keywords: vec!["cadbury".to_string()],
        }
    }

    fn order_request(product: Product) -> OrderRequest {
        OrderRequest {
            product,
            quantity: 1,
            user: UserContext::new("user-1", "12 MG Road"),
        }
    }

    #[test]
    fn test_search_matches_title_and_keywords() {
        tokio_test::block_on(async {
            let connector = StaticCatalogConnector::new("quick", vec![chocolate()]);
            let hits = connector
                .search(&SearchQuery::new("cadbury", 1), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].external_id, "choc-1");

            let none = connector
                .search(&SearchQuery::new("detergent", 1), Duration::from_secs(1))
                .await
                .unwrap();
            assert!(none.is_empty());
        });
    }

    #[test]
    fn test_quote_reflects_price_factor_and_stock_override() {
        tokio_test::block_on(async {
            let connector = StaticCatalogConnector::new("quick", vec![chocolate()]);
            connector.set_price_factor(2.2);
            connector.set_stock(Some(0));

            let quote = connector
                .quote("choc-1", Duration::from_secs(1))
                .await
                .unwrap();
            assert!((quote.unit_price - 99.0).abs() < 1e-9);
            assert_eq!(quote.stock, Some(0));
        });
    }

    #[test]
    fn test_scripted_order_failures_then_success() {
        tokio_test::block_on(async {
            let connector = StaticCatalogConnector::new("quick", vec![chocolate()]);
            connector.script_orders(vec![
                Err(ConnectorError::Transient("hiccup".into())),
                Ok(()),
            ]);
            let product = chocolate().to_product("quick", 1.0);

            let first = connector
                .order(
                    &order_request(product.clone()),
                    &OtpChannel::disconnected(),
                    Duration::from_secs(1),
                )
                .await;
            assert!(matches!(first, Err(ConnectorError::Transient(_))));

            let second = connector
                .order(
                    &order_request(product),
                    &OtpChannel::disconnected(),
                    Duration::from_secs(1),
                )
                .await
                .unwrap();
            assert!(second.order_id.starts_with("QUICK-"));
            assert_eq!(connector.order_calls(), 2);
        });
    }

    #[test]
    fn test_otp_required_order_waits_for_code() {
        tokio_test::block_on(async {
            let connector =
                StaticCatalogConnector::new("quick", vec![chocolate()]).with_otp_required();
            let product = chocolate().to_product("quick", 1.0);

            let (otp, mut rx) = OtpChannel::new();
            let answerer = tokio::spawn(async move {
                let request = rx.recv().await.expect("otp request");
                request.reply.send("9999".to_string()).ok();
            });

            let receipt = connector
                .order(&order_request(product), &otp, Duration::from_secs(1))
                .await
                .unwrap();
            assert!(!receipt.order_id.is_empty());
            answerer.await.unwrap();
        });
    }
}
