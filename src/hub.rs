//! Process-wide registry of live sessions, keyed by user id. Routes
//! broadcasts and answers presence queries. A user is online iff they have
//! at least one registered session.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::protocol::ServerFrame;

/// One live connection's outbound endpoint. Dropping the sender closes the
/// session's queue; its task observes that and shuts down.
pub struct SessionHandle {
    pub id: String,
    pub user_id: String,
    pub tx: mpsc::Sender<ServerFrame>,
}

#[derive(Default)]
pub struct Hub {
    inner: RwLock<HashMap<String, Vec<SessionHandle>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns true if this is the user's first live
    /// session (presence transitions to online).
    pub fn register(&self, handle: SessionHandle) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let sessions = map.entry(handle.user_id.clone()).or_default();
        let first = sessions.is_empty();
        sessions.push(handle);
        first
    }

    /// Remove a session. Returns true if the user now has no live sessions
    /// (presence transitions to offline).
    pub fn unregister(&self, user_id: &str, session_id: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(sessions) = map.get_mut(user_id) {
            sessions.retain(|s| s.id != session_id);
            if sessions.is_empty() {
                map.remove(user_id);
                return true;
            }
        }
        false
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(user_id).is_some_and(|s| !s.is_empty())
    }

    pub fn session_count(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values().map(|s| s.len()).sum()
    }

    /// Enqueue `frame` on every live session of every listed user, skipping
    /// `exclude_session` if given. Best-effort: a session whose queue is full
    /// is evicted (its sender is dropped, which closes its task) and the
    /// remaining deliveries continue.
    pub fn send_to_users(&self, user_ids: &[String], frame: &ServerFrame, exclude_session: Option<&str>) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for user_id in user_ids {
            let Some(sessions) = map.get_mut(user_id) else {
                continue;
            };
            sessions.retain(|session| {
                if exclude_session == Some(session.id.as_str()) {
                    return true;
                }
                match session.tx.try_send(frame.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        log::warn!(
                            "hub: outbound queue full, closing session session_id={} user_id={}",
                            session.id,
                            session.user_id
                        );
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
            if sessions.is_empty() {
                map.remove(user_id);
            }
        }
    }
}
