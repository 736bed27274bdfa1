//! Connector contract
//!
//! A connector adapts one merchant platform. Capabilities are a subset of
//! {search, order}; callers must check before dispatching. Every call gets a
//! deadline and must return within it or answer `Unavailable`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use mandi_core::types::{Product, UserContext};

/// What a connector can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Search,
    Order,
}

/// Connector error taxonomy surfaced to callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector unavailable: {0}")]
    Unavailable(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("out of stock")]
    OutOfStock,

    #[error("price changed to {new_price}")]
    PriceChanged { new_price: f64 },

    #[error("rate limited")]
    RateLimited,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ConnectorError {
    /// Stable label for search-failure records and audit detail.
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectorError::Unavailable(_) => "unavailable",
            ConnectorError::AuthRequired => "auth_required",
            ConnectorError::OutOfStock => "out_of_stock",
            ConnectorError::PriceChanged { .. } => "price_changed",
            ConnectorError::RateLimited => "rate_limited",
            ConnectorError::Transient(_) => "transient",
            ConnectorError::Permanent(_) => "permanent",
        }
    }

    /// Whether the purchase executor may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Transient(_) | ConnectorError::Unavailable(_)
        )
    }

    /// Whether retrying is pointless and the attempt chain must stop.
    pub fn aborts_retries(&self) -> bool {
        matches!(
            self,
            ConnectorError::OutOfStock | ConnectorError::PriceChanged { .. }
        )
    }
}

/// Search request forwarded to every capable connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub item: String,
    pub quantity: u32,
    /// Free-form hints (urgency, category, language) a connector may use.
    #[serde(default)]
    pub hints: Value,
}

impl SearchQuery {
    pub fn new(item: impl Into<String>, quantity: u32) -> Self {
        Self {
            item: item.into(),
            quantity: quantity.max(1),
            hints: Value::Null,
        }
    }

    pub fn with_hints(mut self, hints: Value) -> Self {
        self.hints = hints;
        self
    }
}

/// Order request for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub product: Product,
    pub quantity: u32,
    pub user: UserContext,
}

/// Connector acknowledgement for a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
}

/// Current price/stock answer for pre-purchase validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub unit_price: f64,
    #[serde(default)]
    pub stock: Option<u32>,
}

/// Out-of-band code request raised by a connector mid-order.
#[derive(Debug)]
pub struct OtpRequest {
    pub detail: String,
    pub reply: oneshot::Sender<String>,
}

/// One-shot request/reply port for OTP codes.
///
/// The purchase executor owns the receiving side: it publishes an
/// `otp_required` event and forwards the user-supplied code. A connector
/// that gets no code within its deadline treats the attempt as transient.
#[derive(Clone)]
pub struct OtpChannel {
    tx: mpsc::Sender<OtpRequest>,
}

impl OtpChannel {
    /// Create a channel pair; the receiver side goes to the executor.
    pub fn new() -> (Self, mpsc::Receiver<OtpRequest>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Channel whose requests are never answered; orders needing an OTP
    /// against it come back transient.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    /// Ask the user for a code, waiting at most `timeout`.
    pub async fn request(
        &self,
        detail: impl Into<String>,
        timeout: Duration,
    ) -> Result<String, ConnectorError> {
        let (reply, rx) = oneshot::channel();
        let request = OtpRequest {
            detail: detail.into(),
            reply,
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| ConnectorError::Transient("otp listener gone".to_string()))?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(_)) => Err(ConnectorError::Transient("otp reply dropped".to_string())),
            Err(_) => Err(ConnectorError::Transient("otp wait timed out".to_string())),
        }
    }
}

/// Connector trait - one merchant platform behind a uniform contract.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stable connector identifier.
    fn id(&self) -> &str;

    /// Capabilities this connector supports.
    fn capabilities(&self) -> &[Capability];

    fn can(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Search the platform. Must return within `deadline` or answer
    /// `Unavailable`.
    async fn search(
        &self,
        query: &SearchQuery,
        deadline: Duration,
    ) -> Result<Vec<Product>, ConnectorError>;

    /// Re-quote one product's current price and stock.
    async fn quote(
        &self,
        external_id: &str,
        deadline: Duration,
    ) -> Result<Quote, ConnectorError>;

    /// Place an order. May request an OTP code through `otp`.
    async fn order(
        &self,
        request: &OrderRequest,
        otp: &OtpChannel,
        deadline: Duration,
    ) -> Result<OrderReceipt, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reasons_and_retry_classes() {
        assert_eq!(ConnectorError::RateLimited.reason(), "rate_limited");
        assert!(ConnectorError::Transient("x".into()).is_retryable());
        assert!(ConnectorError::Unavailable("x".into()).is_retryable());
        assert!(!ConnectorError::OutOfStock.is_retryable());
        assert!(ConnectorError::OutOfStock.aborts_retries());
        assert!(ConnectorError::PriceChanged { new_price: 9.0 }.aborts_retries());
        assert!(!ConnectorError::Permanent("x".into()).aborts_retries());
    }

    #[test]
    fn test_otp_round_trip() {
        tokio_test::block_on(async {
            let (channel, mut rx) = OtpChannel::new();
            let answerer = tokio::spawn(async move {
                let request = rx.recv().await.expect("otp request");
                assert_eq!(request.detail, "order 42");
                request.reply.send("123456".to_string()).ok();
            });

            let code = channel
                .request("order 42", Duration::from_secs(1))
                .await
                .expect("code");
            assert_eq!(code, "123456");
            answerer.await.unwrap();
        });
    }

    #[test]
    fn test_otp_timeout_is_transient() {
        tokio_test::block_on(async {
            let (channel, _rx) = OtpChannel::new();
            let err = channel
                .request("order 42", Duration::from_millis(20))
                .await
                .unwrap_err();
            assert!(matches!(err, ConnectorError::Transient(_)));
        });
    }

    #[test]
    fn test_disconnected_otp_channel_is_transient() {
        tokio_test::block_on(async {
            let channel = OtpChannel::disconnected();
            let err = channel
                .request("order 42", Duration::from_millis(20))
                .await
                .unwrap_err();
            assert!(matches!(err, ConnectorError::Transient(_)));
        });
    }
}
