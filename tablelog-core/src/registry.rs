//! Active-session registry.
//!
//! The map lives behind an `RwLock` that is only held for the map operation
//! itself. Each session sits behind its own `Mutex`; mutating operations
//! lock the session, never the map, so work on different ids runs
//! concurrently. Lock order is session then map, and nothing waits on a
//! session while holding the map.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::models::{Session, SessionId};

pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct SessionRegistry {
    // Ids are strictly increasing, so key order is insertion order.
    sessions: RwLock<BTreeMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session. Returns `false` (and leaves the map untouched)
    /// if the id is already present.
    pub async fn insert(&self, session: Session) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return false;
        }
        sessions.insert(session.id, Arc::new(Mutex::new(session)));
        true
    }

    pub async fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Frozen list of handles in insertion order. Sessions removed after the
    /// snapshot is taken are still in the list; callers re-check status
    /// under the session lock.
    pub async fn snapshot(&self) -> Vec<(SessionId, SessionHandle)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect()
    }

    /// Copies of every active session, in insertion order.
    pub async fn list_active(&self) -> Vec<Session> {
        let handles = self.snapshot().await;
        let mut out = Vec::with_capacity(handles.len());
        for (_, handle) in handles {
            let session = handle.lock().await;
            if session.is_active() {
                out.push(session.clone());
            }
        }
        out
    }
}
