use serde_json::json;
use tablelog_core::ipc::{TablelogRequest, TablelogResponse};
use tablelog_core::{Origin, ReminderActionId, StartSession, TablelogError};

use crate::state::AppState;

/// Dispatch one IPC request against the engine.
pub async fn handle_request(request: TablelogRequest, state: &AppState) -> TablelogResponse {
    match dispatch(request, state).await {
        Ok(response) => response,
        Err(e) => {
            if !e.is_client_error() {
                tracing::error!(error = %e, "IPC request failed");
            }
            TablelogResponse::err(e.to_string())
        }
    }
}

async fn dispatch(
    request: TablelogRequest,
    state: &AppState,
) -> Result<TablelogResponse, TablelogError> {
    let engine = &state.engine;
    match request {
        TablelogRequest::Ping => Ok(TablelogResponse::pong()),
        TablelogRequest::Health => {
            let health = engine.health(&state.scanner).await;
            Ok(TablelogResponse::ok(json!({
                "status": "healthy",
                "active_sessions": health.active_sessions,
                "scanner_running": health.scanner_running,
                "ticks": health.ticks,
                "notifier": state.notifier_enabled,
            })))
        }
        TablelogRequest::Start {
            customer_count,
            service,
            estimated_amount,
            duration,
            user_id,
            channel_id,
        } => {
            let origin = Origin {
                source: Some("ipc".to_string()),
                user_id,
                channel_id,
            };
            let session = engine
                .start(StartSession {
                    customer_count,
                    service_type: service,
                    estimated_amount,
                    duration_minutes: duration,
                    origin: Some(origin),
                })
                .await?;
            Ok(TablelogResponse::ok(json!({"service_id": session.id, "session": session})))
        }
        TablelogRequest::Extend {
            id,
            extension_minutes,
        } => {
            let new_end_time = engine.extend(&id, extension_minutes).await?;
            Ok(TablelogResponse::ok(json!({"service_id": id, "new_end_time": new_end_time})))
        }
        TablelogRequest::End {
            id,
            actual_amount,
            status,
        } => {
            let board_message = engine.end(&id, actual_amount, status).await?;
            Ok(TablelogResponse::ok(json!({"board_message": board_message})))
        }
        TablelogRequest::ListActive => {
            let sessions = engine.list_active().await;
            Ok(TablelogResponse::ok(json!({"count": sessions.len(), "services": sessions})))
        }
        TablelogRequest::ReminderAction { action_id } => {
            let action_id: ReminderActionId = action_id.parse()?;
            let outcome = engine.apply_reminder_action(&action_id).await?;
            Ok(TablelogResponse::ok(json!({"service_id": action_id.session_id, "outcome": outcome})))
        }
    }
}
