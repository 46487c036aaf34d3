//! Process-wide wiring: one registry, one engine, one scanner.

use std::sync::Arc;
use std::time::Instant;

use tablelog_core::{
    BroadcastSink, Clock, EventSink, FanoutSink, ReminderNotifier, Scanner, ScannerState,
    SessionEngine, SessionRegistry, SystemClock, TablelogConfig,
};

use crate::subsystems::notifier::WebhookNotifier;

/// Buffered events per push subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

/// Shared state for the HTTP and IPC front-ends.
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    pub scanner: Arc<ScannerState>,
    pub events: BroadcastSink,
    pub config: TablelogConfig,
    pub notifier_enabled: bool,
    pub started_at: Instant,
}

impl AppState {
    /// Production wiring: system clock, webhook notifier when configured.
    pub fn build(config: TablelogConfig) -> anyhow::Result<(Arc<AppState>, Arc<Scanner>)> {
        let webhook = if config.notifier.is_enabled() {
            Some(Arc::new(WebhookNotifier::from_config(&config.notifier)?))
        } else {
            tracing::info!("Reminder webhook not configured; chat notifications disabled");
            None
        };
        Ok(Self::assemble(config, Arc::new(SystemClock), webhook))
    }

    /// Wiring with an injected clock and no external notifier.
    pub fn with_clock(config: TablelogConfig, clock: Arc<dyn Clock>) -> (Arc<AppState>, Arc<Scanner>) {
        Self::assemble(config, clock, None)
    }

    fn assemble(
        config: TablelogConfig,
        clock: Arc<dyn Clock>,
        webhook: Option<Arc<WebhookNotifier>>,
    ) -> (Arc<AppState>, Arc<Scanner>) {
        let registry = Arc::new(SessionRegistry::new());
        let events = BroadcastSink::new(EVENT_BUFFER);

        let mut fanout = FanoutSink::new().with(Arc::new(events.clone()));
        if let Some(webhook) = &webhook {
            fanout = fanout.with(webhook.clone() as Arc<dyn EventSink>);
        }
        let sink: Arc<dyn EventSink> = Arc::new(fanout);

        let engine = Arc::new(SessionEngine::new(
            registry.clone(),
            sink.clone(),
            clock.clone(),
            config.limits.clone(),
        ));

        let mut scanner = Scanner::new(registry, sink, clock, config.scanner.clone());
        if let Some(webhook) = &webhook {
            scanner = scanner.with_notifier(webhook.clone() as Arc<dyn ReminderNotifier>);
        }
        let scanner = Arc::new(scanner);

        let state = Arc::new(AppState {
            engine,
            scanner: scanner.state(),
            events,
            config,
            notifier_enabled: webhook.is_some(),
            started_at: Instant::now(),
        });
        (state, scanner)
    }
}
