//! HTTP + WebSocket transport
//!
//! Thin adapter from axum onto the ApiService: JSON handlers for the chat,
//! confirmation, cancel, session, history, and OTP surfaces, plus a
//! WebSocket relay of the per-session event stream with heartbeats and an
//! idle cutoff.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::time::{interval, Instant, MissedTickBehavior};

use mandi_api::{
    ApiError, ApiService, CancelRequest, ChatProcessRequest, OrderConfirmRequest,
    OtpSubmitRequest, RuntimeApi,
};
use mandi_runtime::RuntimeApp;
use mandi_stores::Event;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const IDLE_CUTOFF: Duration = Duration::from_secs(300);

#[derive(Clone)]
struct AppState {
    api: Arc<RuntimeApi>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Serve the transport until the process is told to stop.
pub async fn run_server(app: RuntimeApp) -> anyhow::Result<()> {
    let listen = app.listen_addr;
    let api = Arc::new(RuntimeApi::new(app.orchestrator.clone()));

    // Session TTL sweeper.
    let sweeper_orchestrator = app.orchestrator.clone();
    let sweep_interval = app.session_sweep_interval;
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweeper_orchestrator.sweep_idle_sessions().await;
        }
    });

    let state = AppState { api };
    let router = Router::new()
        .route("/health", get(health))
        .route("/api/chat/process", post(process_chat))
        .route("/api/order/confirm", post(confirm_order))
        .route("/api/cancel", post(cancel))
        .route("/api/otp", post(submit_otp))
        .route("/api/session/{id}", get(session_snapshot))
        .route("/api/history", get(history))
        .route("/ws/events/{session_id}", get(events_ws))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("bind server listener failed")?;
    tracing::info!(listen = %listen, "mandi-server listening");
    axum::serve(listener, router)
        .await
        .context("server terminated with error")
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn process_chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatProcessRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let response = state.api.process_chat(payload).await.map_err(map_api_error)?;
    Ok(Json(response))
}

async fn confirm_order(
    State(state): State<AppState>,
    Json(payload): Json<OrderConfirmRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let response = state
        .api
        .confirm_order(payload)
        .await
        .map_err(map_api_error)?;
    Ok(Json(response))
}

async fn cancel(
    State(state): State<AppState>,
    Json(payload): Json<CancelRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let response = state.api.cancel(payload).await.map_err(map_api_error)?;
    Ok(Json(response))
}

async fn submit_otp(
    State(state): State<AppState>,
    Json(payload): Json<OtpSubmitRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let response = state.api.submit_otp(payload).await.map_err(map_api_error)?;
    Ok(Json(response))
}

async fn session_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let session = state.api.session(&id).await.map_err(map_api_error)?;
    Ok(Json(session))
}

async fn history(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let records = state.api.history().await.map_err(map_api_error)?;
    Ok(Json(records))
}

// GET /ws/events/{session_id} - WebSocket upgrade
async fn events_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_events(socket, state, session_id))
}

/// Relay the session's event stream onto one socket, one JSON event per
/// frame. A ping goes out every 25s; a socket with no inbound activity for
/// 5 minutes is closed.
async fn relay_events(socket: WebSocket, state: AppState, session_id: String) {
    tracing::debug!(session_id = %session_id, "websocket subscriber connected");
    let mut subscription = state.api.subscribe_events(&session_id).await;
    let (mut tx, mut rx) = socket.split();

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode event frame");
                        continue;
                    }
                };
                if let Event::Dropped { count } = &event {
                    tracing::warn!(
                        session_id = %session_id,
                        dropped = count,
                        "subscriber lagged behind; older events dropped"
                    );
                }
                if tx.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            inbound = rx.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_activity = Instant::now(),
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "websocket read error");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if last_activity.elapsed() > IDLE_CUTOFF {
                    tracing::debug!(session_id = %session_id, "closing idle websocket");
                    let _ = tx.send(Message::Close(None)).await;
                    break;
                }
                if tx.send(Message::Ping("ping".into())).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!(session_id = %session_id, "websocket subscriber disconnected");
}

fn map_api_error(err: ApiError) -> (StatusCode, Json<ErrorBody>) {
    let (status, code) = match err.code() {
        mandi_api::ErrorCode::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        mandi_api::ErrorCode::InvalidArgument => (StatusCode::BAD_REQUEST, "bad_request"),
        mandi_api::ErrorCode::Conflict => (StatusCode::CONFLICT, "conflict"),
        mandi_api::ErrorCode::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            message: err.to_string(),
        }),
    )
}
