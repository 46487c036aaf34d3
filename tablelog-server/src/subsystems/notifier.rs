//! Chat webhook delivery.
//!
//! Reminders go out with their three quick-action buttons and mention the
//! user who opened the session. Session start/end announcements go to the
//! same channel. One attempt per message: failures are logged upstream and
//! never retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tablelog_core::config::NotifierConfig;
use tablelog_core::{EventSink, ReminderNotice, ReminderNotifier, SessionEvent, TablelogError};

pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn from_config(config: &NotifierConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            url: config.webhook_url.trim().to_string(),
        })
    }

    async fn post(client: &Client, url: &str, payload: &Value) -> Result<(), TablelogError> {
        client
            .post(url)
            .json(payload)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map(|_| ())
            .map_err(|e| TablelogError::SinkDelivery(e.to_string()))
    }
}

/// Chat payload for a reminder.
pub fn reminder_payload(notice: &ReminderNotice) -> Value {
    let mention = notice
        .origin
        .as_ref()
        .and_then(|o| o.user_id.as_deref())
        .map(|user| format!("<@{}> ", user))
        .unwrap_or_default();

    json!({
        "kind": "reminder",
        "content": format!(
            "{}Reminder: {} ({} guests) ends in {} min at {}",
            mention,
            notice.service,
            notice.customer_count,
            notice.remaining_time,
            notice.end_time.format("%H:%M")
        ),
        "channelId": notice.origin.as_ref().and_then(|o| o.channel_id.clone()),
        "reminder": notice,
    })
}

/// Chat payload for lifecycle announcements. Only starts and ends are
/// announced; everything else stays on the dashboard.
pub fn announcement_payload(event: &SessionEvent) -> Option<Value> {
    match event {
        SessionEvent::SessionStarted { session } => Some(json!({
            "kind": "session_started",
            "content": format!(
                "New session: {} - {} guests, {} yen, {} min (until {})",
                session.service_type,
                session.customer_count,
                session.estimated_amount,
                session.duration_minutes,
                session.end_time.format("%H:%M")
            ),
            "session": session,
        })),
        SessionEvent::SessionEnded { board_message, .. } => Some(json!({
            "kind": "session_ended",
            "content": board_message.message,
            "boardMessage": board_message,
        })),
        _ => None,
    }
}

#[async_trait]
impl ReminderNotifier for WebhookNotifier {
    async fn notify(&self, notice: &ReminderNotice) -> Result<(), TablelogError> {
        Self::post(&self.client, &self.url, &reminder_payload(notice)).await?;
        tracing::info!(session_id = %notice.service_id, "Reminder posted to chat webhook");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

impl EventSink for WebhookNotifier {
    fn publish(&self, event: &SessionEvent) -> Result<(), TablelogError> {
        let Some(payload) = announcement_payload(event) else {
            return Ok(());
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TablelogError::SinkDelivery(format!("no async runtime: {}", e)))?;

        let client = self.client.clone();
        let url = self.url.clone();
        let event_name = event.name();
        let session_id = event.session_id();
        runtime.spawn(async move {
            if let Err(e) = Self::post(&client, &url, &payload).await {
                tracing::warn!(
                    event = event_name,
                    session_id = %session_id,
                    error = %e,
                    "Chat announcement failed"
                );
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
