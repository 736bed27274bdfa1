//! # Mandi API
//!
//! Transport-agnostic service surface over the orchestrator: a trait with
//! JSON-shaped DTOs and stable error codes. HTTP and WebSocket adapters sit
//! on top of this; nothing here knows about axum.

mod dto;
mod error;
mod service;

pub use dto::{
    CancelRequest, CancelResponse, ChatProcessRequest, ChatProcessResponse, OrderConfirmRequest,
    OrderConfirmResponse, OtpSubmitRequest, OtpSubmitResponse, StageEventView,
};
pub use error::{ApiError, ErrorCode};
pub use service::{ApiService, RuntimeApi};
