//! Tablelog HTTP API
//!
//! Axum-based HTTP server for the web dashboard and any HTTP front-end.
//! Each endpoint has a thin axum handler that delegates to a pure inner
//! function returning `(StatusCode, json)`, so the inner functions can be
//! tested without axum dispatch.
//!
//! Endpoints:
//! - POST /api/service/start: open a session
//! - POST /api/service/extend: extend a session
//! - POST /api/service/end: end a session, returns the board message
//! - POST /api/service/reminder: apply a reminder quick action
//! - GET  /api/services/active: active sessions
//! - GET  /api/events: server-sent event stream
//! - GET  /health: liveness, active count, scanner state
//! - GET  /version: server version info

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tablelog_core::{Origin, ReminderActionId, SessionId, SessionStatus, StartSession, TablelogError};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::state::AppState;
use crate::subsystems::push;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/service/start", post(start_handler))
        .route("/api/service/extend", post(extend_handler))
        .route("/api/service/end", post(end_handler))
        .route("/api/service/reminder", post(reminder_handler))
        .route("/api/services/active", get(active_handler))
        .route("/api/events", get(events_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Tablelog HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

// Fields are optional so a missing field is a 400 with a clear message
// rather than an extractor rejection.

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub customer_count: Option<i64>,
    pub service: Option<String>,
    pub estimated_amount: Option<i64>,
    pub duration: Option<i64>,
    #[serde(default)]
    pub origin: Option<Origin>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExtendRequest {
    pub service_id: Option<String>,
    pub extension_time: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EndRequest {
    pub service_id: Option<String>,
    pub actual_amount: Option<i64>,
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRequest {
    pub action_id: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn start_inner(state: &AppState, req: StartRequest) -> (StatusCode, serde_json::Value) {
    let (Some(customer_count), Some(service), Some(estimated_amount), Some(duration)) =
        (req.customer_count, req.service, req.estimated_amount, req.duration)
    else {
        return bad_request("customerCount, service, estimatedAmount and duration are required");
    };

    let mut origin = req.origin.unwrap_or_default();
    origin.source.get_or_insert_with(|| "web".to_string());

    let result = state
        .engine
        .start(StartSession {
            customer_count,
            service_type: service,
            estimated_amount,
            duration_minutes: duration,
            origin: Some(origin),
        })
        .await;

    match result {
        Ok(session) => (
            StatusCode::OK,
            json!({"success": true, "serviceId": session.id, "serviceLog": session}),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn extend_inner(state: &AppState, req: ExtendRequest) -> (StatusCode, serde_json::Value) {
    let id = match parse_service_id(req.service_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(minutes) = req.extension_time else {
        return bad_request("extensionTime is required");
    };

    match state.engine.extend(&id, minutes).await {
        Ok(new_end_time) => (
            StatusCode::OK,
            json!({"success": true, "newEndTime": new_end_time}),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn end_inner(state: &AppState, req: EndRequest) -> (StatusCode, serde_json::Value) {
    let id = match parse_service_id(req.service_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.engine.end(&id, req.actual_amount, req.status).await {
        Ok(board_message) => (
            StatusCode::OK,
            json!({"success": true, "boardMessage": board_message}),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn reminder_inner(state: &AppState, req: ReminderRequest) -> (StatusCode, serde_json::Value) {
    let Some(raw) = req.action_id else {
        return bad_request("actionId is required");
    };
    let action_id = match raw.parse::<ReminderActionId>() {
        Ok(a) => a,
        Err(e) => return error_response(&e),
    };

    match state.engine.apply_reminder_action(&action_id).await {
        Ok(outcome) => (
            StatusCode::OK,
            json!({"success": true, "serviceId": action_id.session_id, "result": outcome}),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn active_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    let services = state.engine.list_active().await;
    (
        StatusCode::OK,
        json!({"success": true, "count": services.len(), "services": services}),
    )
}

pub async fn health_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    let health = state.engine.health(&state.scanner).await;
    let scanner = if health.scanner_running { "running" } else { "stopped" };
    let notifier = if state.notifier_enabled { "enabled" } else { "disabled" };
    (
        StatusCode::OK,
        json!({
            "status": "OK",
            "timestamp": Utc::now(),
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": state.started_at.elapsed().as_secs(),
            "activeServices": health.active_sessions,
            "scanner": scanner,
            "ticks": health.ticks,
            "notifier": notifier,
            "pushSubscribers": state.events.subscriber_count(),
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "tablelog/1",
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => start_inner(&state, req).await,
        Err(rejection) => rejected_body(rejection),
    };
    (status, Json(body))
}

pub async fn extend_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExtendRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => extend_inner(&state, req).await,
        Err(rejection) => rejected_body(rejection),
    };
    (status, Json(body))
}

pub async fn end_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EndRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => end_inner(&state, req).await,
        Err(rejection) => rejected_body(rejection),
    };
    (status, Json(body))
}

pub async fn reminder_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReminderRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => reminder_inner(&state, req).await,
        Err(rejection) => rejected_body(rejection),
    };
    (status, Json(body))
}

pub async fn active_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = active_inner(&state).await;
    (status, Json(body))
}

pub async fn events_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Subscribe before snapshotting so nothing falls between the two.
    let rx = state.events.subscribe();
    let initial = state.engine.list_active().await;
    push::sse_response(initial, rx)
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"success": false, "error": "Not Found"})),
    )
}

// ============================================================================
// Helpers
// ============================================================================

fn bad_request(msg: &str) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        json!({"success": false, "error": msg}),
    )
}

/// Unparseable or mistyped JSON bodies get the same 400 shape as
/// validation failures.
fn rejected_body(rejection: JsonRejection) -> (StatusCode, serde_json::Value) {
    tracing::debug!(status = %rejection.status(), "Rejected request body");
    bad_request(&rejection.body_text())
}

fn parse_service_id(raw: Option<String>) -> std::result::Result<SessionId, (StatusCode, serde_json::Value)> {
    let raw = raw
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| bad_request("serviceId is required"))?;
    // Ids are numeric; anything else cannot name an active session.
    raw.parse::<SessionId>().map_err(|_| {
        error_response(&TablelogError::NotFound(raw.clone()))
    })
}

/// Map an engine error to a status code and `{success: false, error}` body.
pub fn error_response(e: &TablelogError) -> (StatusCode, serde_json::Value) {
    let status = match e {
        TablelogError::Validation { .. } => StatusCode::BAD_REQUEST,
        TablelogError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => {
            tracing::error!(error = %e, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, json!({"success": false, "error": e.to_string()}))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
