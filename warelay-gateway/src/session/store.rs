//! Process-wide session store.
//!
//! The store is the single source of truth for session state and the only
//! shared mutable structure in the service. It is created once at startup
//! and handed to the lifecycle manager, the media pipeline, and the HTTP
//! routes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::{SessionRecord, SessionSnapshot};
use crate::client::WebClient;

/// Concurrency-safe map of user id to session record.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for a user, or `None` when no session exists.
    pub async fn snapshot(&self, user_id: &str) -> Option<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        sessions.get(user_id).map(SessionRecord::snapshot)
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.sessions.read().await.contains_key(user_id)
    }

    /// Atomically insert an `Initializing` placeholder iff the key is
    /// absent. Returns `false` when a record already exists.
    ///
    /// This is the duplicate-creation guard: of N concurrent inits for one
    /// user, exactly one observes `true` and goes on to launch a client;
    /// the rest see the in-flight record.
    pub async fn reserve(&self, user_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(user_id) {
            return false;
        }
        sessions.insert(user_id.to_string(), SessionRecord::reserved(user_id));
        true
    }

    /// Install the launched client handle and its event pump on a reserved
    /// record. Returns `false` when the record has disappeared (a logout
    /// claimed it mid-launch).
    pub async fn attach_client(
        &self,
        user_id: &str,
        client: WebClient,
        pump: JoinHandle<()>,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(user_id) {
            Some(record) => {
                record.client = Some(client);
                record.pump = Some(pump);
                true
            }
            None => {
                pump.abort();
                false
            }
        }
    }

    /// Apply a mutation to a user's record, atomically with respect to all
    /// other store access. Returns `false` when the record no longer
    /// exists, so late events for removed sessions are dropped.
    pub async fn update<F>(&self, user_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(user_id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Send-capable handle for a user's client, if one is attached.
    pub async fn client_handle(&self, user_id: &str) -> Option<WebClient> {
        let sessions = self.sessions.read().await;
        sessions.get(user_id).and_then(|record| record.client.clone())
    }

    /// Remove and return the owned record. Logout uses this to claim the
    /// client for teardown; from this point the user is absent to every
    /// reader.
    pub async fn remove(&self, user_id: &str) -> Option<SessionRecord> {
        self.sessions.write().await.remove(user_id)
    }
}
