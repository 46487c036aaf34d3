pub mod session;

pub use session::{BoardMessage, Origin, Session, SessionId, SessionStatus};
