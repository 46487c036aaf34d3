//! Reminder quick actions and the chat notification channel.
//!
//! A reminder carries three follow-up actions. Chat front-ends render them as
//! buttons whose action id is `reminder_<session id>_<action>`; pressing one
//! comes back through `SessionEngine::apply_reminder_action`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TablelogError;
use crate::models::{Origin, Session, SessionId};

const ACTION_PREFIX: &str = "reminder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderAction {
    /// Full extension, 60 minutes.
    Extend,
    /// Half extension, 30 minutes.
    Half,
    /// End now at the estimated amount.
    End,
}

impl ReminderAction {
    pub const ALL: [ReminderAction; 3] = [Self::Extend, Self::Half, Self::End];

    pub fn extension_minutes(&self) -> Option<i64> {
        match self {
            Self::Extend => Some(60),
            Self::Half => Some(30),
            Self::End => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Extend => "Extend (60 min)",
            Self::Half => "Half (30 min)",
            Self::End => "End",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Extend => "extend",
            Self::Half => "half",
            Self::End => "end",
        }
    }
}

/// `reminder_<id>_<action>` as carried by chat buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderActionId {
    pub session_id: SessionId,
    pub action: ReminderAction,
}

impl ReminderActionId {
    pub fn new(session_id: SessionId, action: ReminderAction) -> Self {
        Self { session_id, action }
    }
}

impl fmt::Display for ReminderActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", ACTION_PREFIX, self.session_id, self.action.as_str())
    }
}

impl FromStr for ReminderActionId {
    type Err = TablelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TablelogError::validation("actionId", format!("unrecognized action id '{}'", s));

        let mut parts = s.trim().splitn(3, '_');
        let (Some(prefix), Some(id), Some(option)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        if prefix != ACTION_PREFIX {
            return Err(invalid());
        }
        let session_id = id.parse::<SessionId>().map_err(|_| invalid())?;
        let action = match option {
            "extend" => ReminderAction::Extend,
            "half" => ReminderAction::Half,
            "end" => ReminderAction::End,
            _ => return Err(invalid()),
        };
        Ok(Self { session_id, action })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionButton {
    pub action_id: String,
    pub label: &'static str,
    pub action: ReminderAction,
}

/// Everything a chat front-end needs to post a reminder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderNotice {
    pub service_id: SessionId,
    pub service: String,
    pub customer_count: u32,
    pub remaining_time: i64,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    pub actions: Vec<ActionButton>,
}

impl ReminderNotice {
    pub fn for_session(session: &Session, remaining: i64) -> Self {
        let actions = ReminderAction::ALL
            .iter()
            .map(|action| ActionButton {
                action_id: ReminderActionId::new(session.id, *action).to_string(),
                label: action.label(),
                action: *action,
            })
            .collect();

        Self {
            service_id: session.id,
            service: session.service_type.clone(),
            customer_count: session.customer_count,
            remaining_time: remaining,
            end_time: session.end_time,
            origin: session.origin.clone(),
            actions,
        }
    }
}

/// Dedicated channel for reminders (chat bot). Delivery is best effort.
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    async fn notify(&self, notice: &ReminderNotice) -> Result<(), TablelogError>;

    fn name(&self) -> &str;
}
