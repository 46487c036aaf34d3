//! Reminder / overtime scanner.
//!
//! Once per tick every active session is checked against the clock:
//!
//! - reminder: `lead - 1 < remaining <= lead` and not yet sent for this
//!   countdown epoch. Fires once, then `reminder_sent` stays set until an
//!   extension re-arms it. A tick that is skipped while a session sits in
//!   the window loses that reminder; there is no catch-up.
//! - overtime: `remaining < 0`. Fires on every tick until the session ends.
//!
//! `remaining` is rounded up to whole minutes (see `Session::remaining_minutes`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::clock::Clock;
use crate::config::ScannerConfig;
use crate::events::{publish_logged, EventSink, SessionEvent};
use crate::models::{Session, SessionId};
use crate::notify::{ReminderNotice, ReminderNotifier};
use crate::registry::SessionRegistry;

/// Shared liveness info for health checks.
#[derive(Debug, Default)]
pub struct ScannerState {
    running: AtomicBool,
    ticks: AtomicU64,
}

impl ScannerState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    pub reminders: Vec<SessionId>,
    pub overtime: Vec<(SessionId, i64)>,
    /// Sessions ended between the snapshot and their evaluation.
    pub skipped: usize,
    pub failures: usize,
}

enum Finding {
    Reminder(ReminderNotice),
    Overtime(i64),
}

pub struct Scanner {
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn EventSink>,
    notifier: Option<Arc<dyn ReminderNotifier>>,
    clock: Arc<dyn Clock>,
    config: ScannerConfig,
    state: Arc<ScannerState>,
}

impl Scanner {
    pub fn new(
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            notifier: None,
            clock,
            config,
            state: Arc::new(ScannerState::default()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ReminderNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn state(&self) -> Arc<ScannerState> {
        Arc::clone(&self.state)
    }

    pub async fn scan_once(&self) -> ScanReport {
        self.scan_at(self.clock.now()).await
    }

    pub async fn scan_at(&self, now: DateTime<Utc>) -> ScanReport {
        let mut report = ScanReport::default();

        for (id, handle) in self.registry.snapshot().await {
            let finding = {
                let mut session = handle.lock().await;
                if !session.is_active() {
                    report.skipped += 1;
                    continue;
                }
                report.scanned += 1;
                match evaluate(&mut session, now, self.config.reminder_lead_minutes) {
                    Ok(finding) => finding,
                    Err(reason) => {
                        tracing::error!(session_id = %id, reason = %reason, "Session scan failed");
                        report.failures += 1;
                        continue;
                    }
                }
            };

            match finding {
                Some(Finding::Reminder(notice)) => {
                    tracing::info!(
                        session_id = %id,
                        service = %notice.service,
                        remaining_min = notice.remaining_time,
                        "Reminder due"
                    );
                    publish_logged(
                        self.sink.as_ref(),
                        &SessionEvent::ReminderDue {
                            service_id: id,
                            remaining_time: notice.remaining_time,
                            end_time: notice.end_time,
                        },
                    );
                    self.dispatch_notice(notice);
                    report.reminders.push(id);
                }
                Some(Finding::Overtime(minutes)) => {
                    publish_logged(
                        self.sink.as_ref(),
                        &SessionEvent::OvertimeDetected {
                            service_id: id,
                            overtime_minutes: minutes,
                        },
                    );
                    report.overtime.push((id, minutes));
                }
                None => {}
            }
        }

        self.state.ticks.fetch_add(1, Ordering::AcqRel);
        report
    }

    fn dispatch_notice(&self, notice: ReminderNotice) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notice).await {
                tracing::warn!(
                    notifier = notifier.name(),
                    session_id = %notice.service_id,
                    error = %e,
                    "Reminder notification failed"
                );
            }
        });
    }

    /// Tick until `shutdown` fires. A tick already in progress completes.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.tick_seconds.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.state.running.store(true, Ordering::Release);
        tracing::info!(
            tick_secs = self.config.tick_seconds,
            lead_min = self.config.reminder_lead_minutes,
            "Reminder scanner started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.scan_once().await;
                    tracing::debug!(
                        scanned = report.scanned,
                        reminders = report.reminders.len(),
                        overtime = report.overtime.len(),
                        skipped = report.skipped,
                        failures = report.failures,
                        "Scan tick complete"
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Reminder scanner shutting down");
                    break;
                }
            }
        }

        self.state.running.store(false, Ordering::Release);
    }

    pub fn spawn(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

fn evaluate(session: &mut Session, now: DateTime<Utc>, lead: i64) -> Result<Option<Finding>, String> {
    session.check_consistency()?;

    let remaining = session.remaining_minutes(now);
    if remaining > lead - 1 && remaining <= lead && !session.reminder_sent {
        session.reminder_sent = true;
        return Ok(Some(Finding::Reminder(ReminderNotice::for_session(session, remaining))));
    }
    if remaining < 0 && session.is_active() {
        return Ok(Some(Finding::Overtime(-remaining)));
    }
    Ok(None)
}
