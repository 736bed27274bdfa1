//! # Mandi Runtime
//!
//! Wires the core pipeline engine to connectors, stores, and clients:
//! - Stage implementations for the nine canonical stages
//! - The purchase executor (pre-validation, risk, idempotency, retry,
//!   fallback, audit)
//! - Confirmation and OTP rendezvous routers
//! - The orchestrator driving runs and relaying progress
//! - Bootstrap from configuration with process exit codes

pub mod bootstrap;
pub mod confirmation;
pub mod orchestrator;
pub mod purchase;
pub mod services;
pub mod stages;

pub use bootstrap::{build_runtime, builtin_catalog, BootstrapError, RuntimeApp};
pub use confirmation::{ConfirmationRouter, OtpRouter, RunPhase, RunWatch};
pub use orchestrator::{Orchestrator, RunReport, RuntimeError};
pub use purchase::PurchaseExecutor;
pub use services::{RuntimeServices, RuntimeTuning};
pub use stages::{
    build_stage_set, HeuristicIntentClassifier, IntentClassifier, KnowledgeBase,
    StaticKnowledgeBase,
};
