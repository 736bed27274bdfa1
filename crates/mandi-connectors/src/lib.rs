//! # Mandi Connectors
//!
//! Uniform contract for merchant platform adapters and the machinery around
//! them:
//! - Connector trait with search/order capabilities and a typed error taxonomy
//! - One-shot OTP rendezvous between an executing order and the user
//! - Runtime registry with rolling health tracking
//! - Bounded, partial-failure-tolerant search fan-out
//! - A static-catalog connector for development and dry-run setups
//!
//! The actual merchant transports (browser automation, vendor APIs) live
//! behind this seam and are out of scope here.

mod catalog;
mod connector;
mod fanout;
mod registry;

pub use catalog::{CatalogItem, StaticCatalogConnector};
pub use connector::{
    Capability, Connector, ConnectorError, OrderReceipt, OrderRequest, OtpChannel, OtpRequest,
    Quote, SearchQuery,
};
pub use fanout::{FanoutConfig, FanoutError, SearchFanout};
pub use registry::ConnectorRegistry;
