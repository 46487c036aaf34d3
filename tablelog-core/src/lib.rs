pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ipc;
pub mod models;
pub mod notify;
pub mod registry;
pub mod scanner;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TablelogConfig;
pub use engine::{HealthReport, ReminderOutcome, SessionEngine, StartSession};
pub use error::TablelogError;
pub use events::{BroadcastSink, EventSink, FanoutSink, SessionEvent};
pub use models::{BoardMessage, Origin, Session, SessionId, SessionStatus};
pub use notify::{ReminderAction, ReminderActionId, ReminderNotice, ReminderNotifier};
pub use registry::SessionRegistry;
pub use scanner::{ScanReport, Scanner, ScannerState};
