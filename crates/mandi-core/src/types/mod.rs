//! Core type definitions for Mandi
//!
//! This module contains the fundamental types used throughout the system:
//! - Intent: structured reading of one user utterance
//! - Product / SearchHits: normalized merchant results
//! - Plan / Ranking / Decision / PurchaseResult: stage outputs
//! - Session / Run: conversational identity and one pipeline execution

mod decision;
mod intent;
mod plan;
mod product;
mod purchase;
mod ranking;
mod session;

pub use decision::{ConfirmationOutcome, Decision, PolicyFlag};
pub use intent::{Intent, IntentKind, Urgency};
pub use plan::{InfoAnswer, Notification, Plan};
pub use product::{Product, SearchFailure, SearchHits};
pub use purchase::{PurchaseResult, PurchaseStatus, RiskLevel, UserContext};
pub use ranking::{RankedProduct, Ranking, ScoreComponents};
pub use session::{
    PathKind, Run, RunId, Session, SessionId, StageId, StageState, StageStatus,
};
