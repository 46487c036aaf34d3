//! Server-sent event stream for the web dashboard.

use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use tablelog_core::{Session, SessionEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Name of the SSE event carrying the active-session list sent on connect.
pub const SNAPSHOT_EVENT: &str = "active_services";

pub fn to_sse_event(event: &SessionEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.name()).json_data(event)
}

/// A stream that first yields the current active list, then every
/// subsequent session event. A subscriber that falls behind skips the
/// missed events and keeps going.
pub fn event_stream(
    initial: Vec<Session>,
    rx: broadcast::Receiver<SessionEvent>,
) -> impl Stream<Item = Result<Event, axum::Error>> + Send + 'static {
    let snapshot = stream::once(async move {
        Event::default().event(SNAPSHOT_EVENT).json_data(&initial)
    });

    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((to_sse_event(&event), rx)),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed = missed, "Push subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    stream::StreamExt::chain(snapshot, live)
}

pub fn sse_response(
    initial: Vec<Session>,
    rx: broadcast::Receiver<SessionEvent>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>> + Send + 'static> {
    Sse::new(event_stream(initial, rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tablelog_core::{BroadcastSink, EventSink, SessionId};

    #[tokio::test]
    async fn test_stream_starts_with_snapshot_then_live_events() {
        let sink = BroadcastSink::new(8);
        let stream = event_stream(Vec::new(), sink.subscribe());
        futures::pin_mut!(stream);

        assert!(stream.next().await.unwrap().is_ok());

        sink.publish(&SessionEvent::OvertimeDetected {
            service_id: SessionId::from_raw(3),
            overtime_minutes: 2,
        })
        .unwrap();
        assert!(stream.next().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        let sink = BroadcastSink::new(8);
        let rx = sink.subscribe();
        drop(sink);
        let stream = event_stream(Vec::new(), rx);
        futures::pin_mut!(stream);
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let sink = BroadcastSink::new(2);
        let stream = event_stream(Vec::new(), sink.subscribe());
        futures::pin_mut!(stream);
        let _ = stream.next().await;

        for id in 0..5 {
            sink.publish(&SessionEvent::OvertimeDetected {
                service_id: SessionId::from_raw(id),
                overtime_minutes: 1,
            })
            .unwrap();
        }
        // oldest events were overwritten; the stream still yields the newest
        assert!(stream.next().await.unwrap().is_ok());
    }
}
