//! Session events and the sinks that fan them out.
//!
//! The engine and scanner only see the `EventSink` trait. Publishing must
//! not block: a sink either hands the event to an in-memory channel or
//! spawns its own delivery. Failures come back as `SinkDelivery` errors,
//! which callers log and drop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::TablelogError;
use crate::models::{BoardMessage, Session, SessionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session: Session,
    },
    #[serde(rename_all = "camelCase")]
    SessionExtended {
        service_id: SessionId,
        new_end_time: DateTime<Utc>,
        extension_time: i64,
    },
    #[serde(rename_all = "camelCase")]
    SessionEnded {
        service_id: SessionId,
        board_message: BoardMessage,
    },
    #[serde(rename_all = "camelCase")]
    ReminderDue {
        service_id: SessionId,
        remaining_time: i64,
        end_time: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    OvertimeDetected {
        service_id: SessionId,
        overtime_minutes: i64,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::SessionExtended { .. } => "session_extended",
            Self::SessionEnded { .. } => "session_ended",
            Self::ReminderDue { .. } => "reminder_due",
            Self::OvertimeDetected { .. } => "overtime_detected",
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SessionStarted { session } => session.id,
            Self::SessionExtended { service_id, .. }
            | Self::SessionEnded { service_id, .. }
            | Self::ReminderDue { service_id, .. }
            | Self::OvertimeDetected { service_id, .. } => *service_id,
        }
    }
}

/// Receives lifecycle and scan events. Implementations must return quickly.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &SessionEvent) -> Result<(), TablelogError>;

    fn name(&self) -> &str;
}

/// Publish and log any failure. Delivery errors never reach the caller.
pub fn publish_logged(sink: &dyn EventSink, event: &SessionEvent) {
    if let Err(e) = sink.publish(event) {
        tracing::warn!(
            sink = sink.name(),
            event = event.name(),
            session_id = %event.session_id(),
            error = %e,
            "Event delivery failed"
        );
    }
}

// ============================================================================
// BroadcastSink
// ============================================================================

/// In-process pub/sub backed by `tokio::sync::broadcast`. The web push
/// stream and IPC subscribers each hold a receiver.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &SessionEvent) -> Result<(), TablelogError> {
        // No subscribers is normal (no dashboard open); not a failure.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "broadcast"
    }
}

// ============================================================================
// FanoutSink
// ============================================================================

/// Delivers each event to every inner sink. One failing sink does not
/// stop delivery to the rest; the first error is returned after all ran.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: &SessionEvent) -> Result<(), TablelogError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event) {
                tracing::warn!(sink = sink.name(), event = event.name(), error = %e, "Fan-out target failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "fanout"
    }
}
