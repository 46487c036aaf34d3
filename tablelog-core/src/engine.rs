//! Session lifecycle engine: start, extend and end.
//!
//! Every entry path (HTTP, IPC, chat quick actions) goes through here, so
//! the same validation applies everywhere. Events are published after the
//! session lock is released and delivery failures are only logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::LimitsConfig;
use crate::error::{Result, TablelogError};
use crate::events::{publish_logged, EventSink, SessionEvent};
use crate::models::{BoardMessage, Origin, Session, SessionId, SessionStatus};
use crate::notify::{ReminderAction, ReminderActionId};
use crate::registry::SessionRegistry;
use crate::scanner::ScannerState;

const MAX_ID_ATTEMPTS: usize = 8;

/// Raw start request. Numeric fields are signed so out-of-range input
/// reaches validation instead of failing deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct StartSession {
    pub customer_count: i64,
    pub service_type: String,
    pub estimated_amount: i64,
    pub duration_minutes: i64,
    #[serde(default)]
    pub origin: Option<Origin>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReminderOutcome {
    #[serde(rename_all = "camelCase")]
    Extended {
        new_end_time: DateTime<Utc>,
        extension_time: i64,
    },
    #[serde(rename_all = "camelCase")]
    Ended { board_message: BoardMessage },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub active_sessions: usize,
    pub scanner_running: bool,
    pub ticks: u64,
}

/// Strictly increasing millisecond ids: `max(now_ms, last + 1)`.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub fn next(&self, now: DateTime<Utc>) -> SessionId {
        let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return SessionId::from_raw(candidate),
                Err(actual) => last = actual,
            }
        }
    }
}

pub struct SessionEngine {
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    limits: LimitsConfig,
    ids: IdGenerator,
}

impl SessionEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            clock,
            limits,
            ids: IdGenerator::default(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn start(&self, req: StartSession) -> Result<Session> {
        let limits = &self.limits;
        let customer_count = check_range(
            "customerCount",
            req.customer_count,
            limits.min_customers,
            limits.max_customers,
        )?;
        let service_type = req.service_type.trim();
        if service_type.is_empty() {
            return Err(TablelogError::validation("service", "must not be empty"));
        }
        if req.estimated_amount < 0 {
            return Err(TablelogError::validation("estimatedAmount", "must be 0 or greater"));
        }
        let duration = check_range(
            "duration",
            req.duration_minutes,
            limits.min_duration_minutes,
            limits.max_duration_minutes,
        )?;

        let now = self.clock.now();
        let mut inserted = None;
        for _ in 0..MAX_ID_ATTEMPTS {
            let session = Session::new(
                self.ids.next(now),
                customer_count as u32,
                service_type.to_string(),
                req.estimated_amount as u64,
                duration,
                now,
                req.origin.clone(),
            );
            if self.registry.insert(session.clone()).await {
                inserted = Some(session);
                break;
            }
            tracing::warn!(session_id = %session.id, "Session id collision, regenerating");
        }
        let session = inserted
            .ok_or_else(|| TablelogError::Other("could not allocate a unique session id".to_string()))?;

        tracing::info!(
            session_id = %session.id,
            service = %session.service_type,
            customers = session.customer_count,
            duration_min = session.duration_minutes,
            "Session started"
        );

        publish_logged(
            self.sink.as_ref(),
            &SessionEvent::SessionStarted {
                session: session.clone(),
            },
        );
        Ok(session)
    }

    /// Returns the new scheduled end time.
    pub async fn extend(&self, id: &SessionId, extension_minutes: i64) -> Result<DateTime<Utc>> {
        check_range(
            "extensionTime",
            extension_minutes,
            self.limits.min_extension_minutes,
            self.limits.max_extension_minutes,
        )?;

        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| TablelogError::NotFound(id.to_string()))?;

        let (new_end_time, service) = {
            let mut session = handle.lock().await;
            if !session.is_active() {
                return Err(TablelogError::NotFound(id.to_string()));
            }
            (session.apply_extension(extension_minutes), session.service_type.clone())
        };

        tracing::info!(
            session_id = %id,
            service = %service,
            extension_min = extension_minutes,
            new_end = %new_end_time,
            "Session extended"
        );

        publish_logged(
            self.sink.as_ref(),
            &SessionEvent::SessionExtended {
                service_id: *id,
                new_end_time,
                extension_time: extension_minutes,
            },
        );
        Ok(new_end_time)
    }

    pub async fn end(
        &self,
        id: &SessionId,
        actual_amount: Option<i64>,
        status: Option<SessionStatus>,
    ) -> Result<BoardMessage> {
        if let Some(amount) = actual_amount {
            if amount < 0 {
                return Err(TablelogError::validation("actualAmount", "must be 0 or greater"));
            }
        }
        if status == Some(SessionStatus::Active) {
            return Err(TablelogError::validation("status", "an ended session cannot stay active"));
        }

        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| TablelogError::NotFound(id.to_string()))?;

        let board_message = {
            let mut session = handle.lock().await;
            if !session.is_active() {
                return Err(TablelogError::NotFound(id.to_string()));
            }
            let amount = actual_amount.map(|a| a as u64).unwrap_or(session.estimated_amount);
            session.actual_amount = Some(amount);
            session.status = status.unwrap_or(SessionStatus::Completed);
            session.ended_at = Some(self.clock.now());

            // Still holding the session lock: lock order is session -> map.
            self.registry.remove(id).await;

            tracing::info!(
                session_id = %id,
                service = %session.service_type,
                amount = session.actual_amount.unwrap_or_default(),
                status = %session.status,
                "Session ended"
            );
            BoardMessage::for_ended(&session)
        };

        publish_logged(
            self.sink.as_ref(),
            &SessionEvent::SessionEnded {
                service_id: *id,
                board_message: board_message.clone(),
            },
        );
        Ok(board_message)
    }

    pub async fn list_active(&self) -> Vec<Session> {
        self.registry.list_active().await
    }

    /// Apply one of the reminder's follow-up actions.
    pub async fn apply_reminder_action(&self, action_id: &ReminderActionId) -> Result<ReminderOutcome> {
        let id = &action_id.session_id;
        match action_id.action {
            ReminderAction::Extend | ReminderAction::Half => {
                let minutes = action_id.action.extension_minutes().unwrap_or_default();
                let new_end_time = self.extend(id, minutes).await?;
                Ok(ReminderOutcome::Extended {
                    new_end_time,
                    extension_time: minutes,
                })
            }
            ReminderAction::End => {
                let board_message = self.end(id, None, None).await?;
                Ok(ReminderOutcome::Ended { board_message })
            }
        }
    }

    pub async fn health(&self, scanner: &ScannerState) -> HealthReport {
        HealthReport {
            active_sessions: self.registry.len().await,
            scanner_running: scanner.is_running(),
            ticks: scanner.ticks(),
        }
    }
}

fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<i64> {
    if value < min || value > max {
        return Err(TablelogError::validation(
            field,
            format!("must be between {} and {}, got {}", min, max, value),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::BroadcastSink;
    use chrono::{Duration, TimeZone};
    use tokio::sync::broadcast;

    fn opening_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 19, 0, 0).unwrap()
    }

    fn make_engine() -> (SessionEngine, Arc<ManualClock>, broadcast::Receiver<SessionEvent>) {
        let sink = BroadcastSink::new(64);
        let rx = sink.subscribe();
        let clock = Arc::new(ManualClock::new(opening_time()));
        let engine = SessionEngine::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(sink),
            clock.clone(),
            LimitsConfig::default(),
        );
        (engine, clock, rx)
    }

    fn start_req(count: i64, service: &str, amount: i64, duration: i64) -> StartSession {
        StartSession {
            customer_count: count,
            service_type: service.to_string(),
            estimated_amount: amount,
            duration_minutes: duration,
            origin: None,
        }
    }

    fn validation_field(err: TablelogError) -> &'static str {
        match err {
            TablelogError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    // ========================================================================
    // start
    // ========================================================================

    #[tokio::test]
    async fn test_start_computes_end_time_and_lists_session() {
        let (engine, _clock, mut rx) = make_engine();
        let session = engine.start(start_req(2, "set", 5000, 60)).await.unwrap();

        assert_eq!(session.start_time, opening_time());
        assert_eq!(session.end_time, opening_time() + Duration::minutes(60));
        assert_eq!(session.status, SessionStatus::Active);
        assert!(!session.reminder_sent);

        let active = engine.list_active().await;
        assert_eq!(active, vec![session.clone()]);

        match rx.try_recv().unwrap() {
            SessionEvent::SessionStarted { session: evt } => assert_eq!(evt, session),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_validation_names_field() {
        let (engine, _clock, _rx) = make_engine();
        let cases = [
            (start_req(0, "set", 100, 60), "customerCount"),
            (start_req(11, "set", 100, 60), "customerCount"),
            (start_req(2, "   ", 100, 60), "service"),
            (start_req(2, "set", -1, 60), "estimatedAmount"),
            (start_req(2, "set", 100, 9), "duration"),
            (start_req(2, "set", 100, 601), "duration"),
        ];
        for (req, field) in cases {
            let err = engine.start(req).await.unwrap_err();
            assert_eq!(validation_field(err), field);
        }
        assert!(engine.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_accepts_boundaries() {
        let (engine, _clock, _rx) = make_engine();
        assert!(engine.start(start_req(1, "half", 0, 10)).await.is_ok());
        assert!(engine.start(start_req(10, "other", 0, 600)).await.is_ok());
    }

    #[tokio::test]
    async fn test_start_ids_unique_within_same_millisecond() {
        let (engine, _clock, _rx) = make_engine();
        let a = engine.start(start_req(1, "set", 0, 30)).await.unwrap();
        let b = engine.start(start_req(1, "set", 0, 30)).await.unwrap();
        let c = engine.start(start_req(1, "set", 0, 30)).await.unwrap();
        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(engine.list_active().await.len(), 3);
    }

    #[tokio::test]
    async fn test_start_trims_service_label_and_keeps_origin() {
        let (engine, _clock, _rx) = make_engine();
        let mut req = start_req(3, "  all-you-can-drink ", 12000, 120);
        req.origin = Some(Origin {
            source: Some("chat".to_string()),
            user_id: Some("u-1".to_string()),
            channel_id: Some("c-9".to_string()),
        });
        let session = engine.start(req).await.unwrap();
        assert_eq!(session.service_type, "all-you-can-drink");
        assert_eq!(session.origin.unwrap().channel_id.as_deref(), Some("c-9"));
    }

    // ========================================================================
    // extend
    // ========================================================================

    #[tokio::test]
    async fn test_extend_adds_minutes_and_rearms_reminder() {
        let (engine, _clock, mut rx) = make_engine();
        let session = engine.start(start_req(2, "set", 5000, 60)).await.unwrap();
        let _ = rx.try_recv();

        let handle = engine.registry().get(&session.id).await.unwrap();
        handle.lock().await.reminder_sent = true;

        let new_end = engine.extend(&session.id, 30).await.unwrap();
        assert_eq!(new_end, session.end_time + Duration::minutes(30));

        let after = handle.lock().await.clone();
        assert_eq!(after.duration_minutes, 90);
        assert_eq!(after.end_time, new_end);
        assert!(!after.reminder_sent);

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::SessionExtended {
                service_id: session.id,
                new_end_time: new_end,
                extension_time: 30,
            }
        );
    }

    #[tokio::test]
    async fn test_extend_rejects_out_of_range() {
        let (engine, _clock, _rx) = make_engine();
        let session = engine.start(start_req(2, "set", 5000, 60)).await.unwrap();
        for minutes in [0, 4, 301, -10] {
            let err = engine.extend(&session.id, minutes).await.unwrap_err();
            assert_eq!(validation_field(err), "extensionTime");
        }
        assert!(engine.extend(&session.id, 5).await.is_ok());
        assert!(engine.extend(&session.id, 300).await.is_ok());
    }

    #[tokio::test]
    async fn test_extend_unknown_id_is_not_found() {
        let (engine, _clock, _rx) = make_engine();
        let err = engine.extend(&SessionId::from_raw(404), 30).await.unwrap_err();
        assert!(matches!(err, TablelogError::NotFound(_)));
    }

    // ========================================================================
    // end
    // ========================================================================

    #[tokio::test]
    async fn test_end_removes_session_permanently() {
        let (engine, clock, _rx) = make_engine();
        let session = engine.start(start_req(2, "set", 5000, 60)).await.unwrap();
        clock.advance(Duration::minutes(42));

        let board = engine.end(&session.id, None, None).await.unwrap();
        assert_eq!(board.kind, SessionStatus::Completed);
        assert_eq!(board.message, "set 2 guests 42min 5000 yen ended");
        assert!(engine.list_active().await.is_empty());

        let err = engine.end(&session.id, None, None).await.unwrap_err();
        assert!(matches!(err, TablelogError::NotFound(_)));
        let err = engine.extend(&session.id, 30).await.unwrap_err();
        assert!(matches!(err, TablelogError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_end_zero_amount_is_not_replaced_by_estimate() {
        let (engine, _clock, _rx) = make_engine();
        let session = engine.start(start_req(1, "other", 3000, 30)).await.unwrap();
        let board = engine.end(&session.id, Some(0), None).await.unwrap();
        assert!(board.message.contains(" 0 yen"));
    }

    #[tokio::test]
    async fn test_end_validation() {
        let (engine, _clock, _rx) = make_engine();
        let session = engine.start(start_req(1, "other", 3000, 30)).await.unwrap();

        let err = engine.end(&session.id, Some(-1), None).await.unwrap_err();
        assert_eq!(validation_field(err), "actualAmount");
        let err = engine
            .end(&session.id, None, Some(SessionStatus::Active))
            .await
            .unwrap_err();
        assert_eq!(validation_field(err), "status");

        // failed validation leaves the session active
        assert_eq!(engine.list_active().await.len(), 1);

        let board = engine
            .end(&session.id, None, Some(SessionStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(board.kind, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_start_extend_end_example() {
        let (engine, clock, mut rx) = make_engine();
        let session = engine.start(start_req(2, "set", 5000, 60)).await.unwrap();
        assert_eq!(session.duration_minutes, 60);

        let new_end = engine.extend(&session.id, 30).await.unwrap();
        assert_eq!(new_end, session.end_time + Duration::minutes(30));
        let listed = engine.list_active().await;
        assert_eq!(listed[0].duration_minutes, 90);

        clock.advance(Duration::minutes(85));
        let board = engine.end(&session.id, Some(7000), None).await.unwrap();
        assert!(board.message.contains("7000"), "board message: {}", board.message);

        let names: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["session_started", "session_extended", "session_ended"]);
    }

    // ========================================================================
    // reminder actions
    // ========================================================================

    #[tokio::test]
    async fn test_reminder_actions_map_to_lifecycle_operations() {
        let (engine, _clock, _rx) = make_engine();
        let session = engine.start(start_req(4, "set", 8000, 60)).await.unwrap();

        let outcome = engine
            .apply_reminder_action(&ReminderActionId::new(session.id, ReminderAction::Half))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReminderOutcome::Extended {
                new_end_time: session.end_time + Duration::minutes(30),
                extension_time: 30,
            }
        );

        engine
            .apply_reminder_action(&ReminderActionId::new(session.id, ReminderAction::Extend))
            .await
            .unwrap();
        assert_eq!(engine.list_active().await[0].duration_minutes, 150);

        let outcome = engine
            .apply_reminder_action(&ReminderActionId::new(session.id, ReminderAction::End))
            .await
            .unwrap();
        match outcome {
            ReminderOutcome::Ended { board_message } => {
                assert!(board_message.message.contains("8000 yen"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let err = engine
            .apply_reminder_action(&ReminderActionId::new(session.id, ReminderAction::End))
            .await
            .unwrap_err();
        assert!(matches!(err, TablelogError::NotFound(_)));
    }

    // ========================================================================
    // concurrency
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_id_extends_never_lose_updates() {
        let (engine, _clock, _rx) = make_engine();
        let engine = Arc::new(engine);
        let session = engine.start(start_req(2, "set", 5000, 60)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let engine = engine.clone();
            let id = session.id;
            let minutes = if i % 2 == 0 { 5 } else { 10 };
            tasks.push(tokio::spawn(async move { engine.extend(&id, minutes).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let active = engine.list_active().await;
        let after = &active[0];
        assert_eq!(after.duration_minutes, 60 + 10 * 5 + 10 * 10);
        assert_eq!(after.end_time, session.start_time + Duration::minutes(after.duration_minutes));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_extend_on_other_id_not_blocked_by_held_session() {
        let (engine, _clock, _rx) = make_engine();
        let engine = Arc::new(engine);
        let a = engine.start(start_req(2, "set", 5000, 60)).await.unwrap();
        let b = engine.start(start_req(3, "set", 6000, 60)).await.unwrap();

        // Hold session A's lock as if a slow operation were in progress.
        let handle_a = engine.registry().get(&a.id).await.unwrap();
        let guard = handle_a.lock().await;

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            engine.extend(&b.id, 30),
        )
        .await;
        assert!(result.is_ok(), "extend on B blocked behind A's lock");
        assert!(result.unwrap().is_ok());

        // Same id does wait.
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            engine.extend(&a.id, 30),
        )
        .await;
        assert!(blocked.is_err());
        drop(guard);
        assert!(engine.extend(&a.id, 30).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_end_only_one_wins() {
        let (engine, _clock, _rx) = make_engine();
        let engine = Arc::new(engine);
        let session = engine.start(start_req(2, "set", 5000, 60)).await.unwrap();

        let e1 = engine.clone();
        let e2 = engine.clone();
        let id = session.id;
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { e1.end(&id, Some(6000), None).await }),
            tokio::spawn(async move { e2.end(&id, Some(7000), None).await }),
        );
        let results = [r1.unwrap(), r2.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(TablelogError::NotFound(_))))
                .count(),
            1
        );
    }

    #[test]
    fn test_id_generator_strictly_increasing() {
        let ids = IdGenerator::default();
        let now = opening_time();
        let first = ids.next(now);
        assert_eq!(first.as_u64(), now.timestamp_millis() as u64);
        let second = ids.next(now);
        assert_eq!(second.as_u64(), first.as_u64() + 1);
        // clock going backwards still yields a larger id
        let third = ids.next(now - Duration::seconds(10));
        assert!(third > second);
    }
}
