use serde::{Deserialize, Serialize};

use crate::models::{SessionId, SessionStatus};

/// Requests accepted on the local socket (chat-bot process).
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TablelogRequest {
    Ping,
    Health,
    Start {
        customer_count: i64,
        service: String,
        estimated_amount: i64,
        duration: i64,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        channel_id: Option<String>,
    },
    Extend {
        id: SessionId,
        extension_minutes: i64,
    },
    End {
        id: SessionId,
        #[serde(default)]
        actual_amount: Option<i64>,
        #[serde(default)]
        status: Option<SessionStatus>,
    },
    ListActive,
    ReminderAction {
        action_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TablelogResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl TablelogResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
