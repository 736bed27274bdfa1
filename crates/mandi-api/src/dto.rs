use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mandi_core::types::{
    Decision, Intent, PurchaseResult, RankedProduct, StageId, StageStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatProcessRequest {
    pub session_id: String,
    pub message: String,
}

/// One stage's terminal state within the reported run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEventView {
    pub stage_id: StageId,
    pub status: StageStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatProcessResponse {
    pub success: bool,
    pub run_id: String,
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub plan_summary: Option<String>,
    #[serde(default)]
    pub ranked_products: Option<Vec<RankedProduct>>,
    #[serde(default)]
    pub decision: Option<Decision>,
    pub awaiting_confirmation: bool,
    /// User-facing terminal message, when the run finished.
    #[serde(default)]
    pub message: Option<String>,
    /// Error kind label for failed runs.
    #[serde(default)]
    pub error: Option<String>,
    pub terminal_stage_events: Vec<StageEventView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmRequest {
    pub session_id: String,
    #[serde(default)]
    pub selected_product_index: Option<usize>,
    /// Defaults to acceptance; set false to decline the order.
    #[serde(default = "default_true")]
    pub accepted: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmResponse {
    pub success: bool,
    /// A high-risk order may park on a fresh confirmation.
    pub awaiting_confirmation: bool,
    #[serde(default)]
    pub purchase_result: Option<PurchaseResult>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSubmitRequest {
    pub token: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSubmitResponse {
    pub delivered: bool,
}
