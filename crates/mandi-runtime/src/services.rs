//! RuntimeServices - the construction-time context object
//!
//! Every shared resource a stage or the purchase executor touches lives
//! here with an explicit lifecycle: built once at bootstrap, immutable
//! afterwards except where the type itself is concurrent (registry, stores,
//! routers). Nothing is accessed ambiently.

use std::sync::Arc;
use std::time::Duration;

use mandi_core::policy::DecisionPolicies;
use mandi_core::ranking::RankWeights;
use mandi_core::types::UserContext;
use mandi_connectors::{ConnectorRegistry, SearchFanout};
use mandi_stores::{AuditLog, CheckpointJournal, SessionEventBus, SessionStore};

use crate::confirmation::{ConfirmationRouter, OtpRouter, RunWatch};

/// Scalar knobs shared across stages and the executor.
#[derive(Debug, Clone)]
pub struct RuntimeTuning {
    pub dry_run: bool,
    /// Order attempts against the primary connector before falling back.
    pub purchase_max_retries: u32,
    pub risk_critical_threshold: u32,
    pub confirmation_timeout: Duration,
    pub idempotency_window: Duration,
    /// Order totals at or above this add risk weight.
    pub budget_large: f64,
    pub rank_weights: RankWeights,
    pub policies: DecisionPolicies,
}

impl Default for RuntimeTuning {
    fn default() -> Self {
        Self {
            dry_run: false,
            purchase_max_retries: 3,
            risk_critical_threshold: 80,
            confirmation_timeout: Duration::from_secs(300),
            idempotency_window: Duration::from_secs(300),
            budget_large: 2000.0,
            rank_weights: RankWeights::default(),
            policies: DecisionPolicies::default(),
        }
    }
}

/// Shared resources handed to stages and the executor at construction time.
pub struct RuntimeServices {
    pub sessions: Arc<SessionStore>,
    pub bus: Arc<SessionEventBus>,
    pub journal: Arc<dyn CheckpointJournal>,
    pub audit: AuditLog,
    pub registry: Arc<ConnectorRegistry>,
    pub fanout: Arc<SearchFanout>,
    pub confirmations: Arc<ConfirmationRouter>,
    pub otp: Arc<OtpRouter>,
    pub run_watch: Arc<RunWatch>,
    /// Static purchase context (delivery address, payment, budget).
    pub user: UserContext,
    pub tuning: RuntimeTuning,
}
