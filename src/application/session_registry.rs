//! Live session registry.
//!
//! Maps each user to their currently connected sessions. Purely
//! in-process and ephemeral: the registry is rebuilt from scratch as
//! clients reconnect after a restart, and carries no durability
//! guarantee. An instance is passed to whoever needs it at
//! construction; there is no process-global registry.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::application::messages::OrderEventMessage;

pub type SessionSender = mpsc::UnboundedSender<OrderEventMessage>;
pub type SessionReceiver = mpsc::UnboundedReceiver<OrderEventMessage>;

/// Task-safe registry of live sessions per user.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, HashMap<Uuid, SessionSender>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new live session for a user. Returns the session id
    /// and the receiving end the connection drains events from.
    pub async fn register(&self, user_id: &str) -> (Uuid, SessionReceiver) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(user_id.to_string())
            .or_default()
            .insert(session_id, tx);

        debug!(user_id, %session_id, "Session registered");
        (session_id, rx)
    }

    /// Remove a session on disconnect. Unknown ids are a no-op.
    pub async fn unregister(&self, user_id: &str, session_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(user_sessions) = sessions.get_mut(user_id) {
            user_sessions.remove(&session_id);
            if user_sessions.is_empty() {
                sessions.remove(user_id);
            }
        }
        debug!(user_id, %session_id, "Session unregistered");
    }

    /// Senders for every live session of a user.
    pub async fn senders_for(&self, user_id: &str) -> Vec<(Uuid, SessionSender)> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(user_id)
            .map(|user_sessions| {
                user_sessions
                    .iter()
                    .map(|(id, tx)| (*id, tx.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of live sessions for a user.
    pub async fn session_count(&self, user_id: &str) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.get(user_id).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
