//! Session lifecycle manager.
//!
//! Owns the state-machine transitions for every user session: creation
//! (reserve, launch, attach, pump), readiness queries, and teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use warelay_common::config::Config;

use super::{SessionSnapshot, SessionState, SessionStore};
use crate::client::{chrome, ClientEvent, WebClient};
use crate::error::GatewayError;

/// Pause after force-closing the browser, before deleting its on-disk
/// profile. The automation layer releases file locks asynchronously.
const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle manager for per-user sessions.
#[derive(Debug, Clone)]
pub struct SessionManager {
    store: SessionStore,
    config: Arc<Config>,
}

impl SessionManager {
    pub fn new(store: SessionStore, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// The underlying store, shared with the pipeline and the routes.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Create the session for a user, or return the existing one.
    ///
    /// Exactly one of any number of concurrent `init` calls for a user
    /// launches a client; the others resolve to the in-flight record.
    /// Returns once the client is launched and registered — readiness
    /// deadlines belong to [`SessionManager::wait_for_ready`].
    pub async fn init(&self, user_id: &str) -> Result<SessionSnapshot, GatewayError> {
        if user_id.trim().is_empty() {
            return Err(GatewayError::InvalidArgument("userId is required".into()));
        }

        if !self.store.reserve(user_id).await {
            // Re-init is idempotent: hand back whatever is in flight.
            return self
                .store
                .snapshot(user_id)
                .await
                .ok_or_else(|| {
                    GatewayError::Internal(format!(
                        "session for {user_id} was torn down during initialization"
                    ))
                });
        }

        let executable = chrome::discover(self.config.browser_path.as_deref());
        let auth_dir = self.config.auth_dir_for(user_id);

        match WebClient::connect(user_id, &auth_dir, executable.as_deref()).await {
            Ok((client, events)) => {
                let pump = tokio::spawn(pump_events(
                    self.store.clone(),
                    user_id.to_string(),
                    events,
                ));
                if !self.store.attach_client(user_id, client.clone(), pump).await {
                    // A logout claimed the reservation mid-launch; honor it.
                    client.close().await;
                    return Err(GatewayError::Internal(format!(
                        "session for {user_id} was torn down during initialization"
                    )));
                }
                tracing::info!(user_id, "session initialized");
                self.store.snapshot(user_id).await.ok_or_else(|| {
                    GatewayError::Internal(format!(
                        "session for {user_id} was torn down during initialization"
                    ))
                })
            }
            Err(err) => {
                // Roll the reservation back so a later init can retry.
                self.store.remove(user_id).await;
                tracing::error!(user_id, error = %err, "browser launch failed");
                Err(GatewayError::Launch(err.to_string()))
            }
        }
    }

    /// Current snapshot for a user. Pure read, no side effects.
    pub async fn status(&self, user_id: &str) -> Option<SessionSnapshot> {
        self.store.snapshot(user_id).await
    }

    /// Bounded cooperative wait until the session is ready, returning
    /// whatever snapshot is current at exit. Never errors on timeout;
    /// callers inspect the state.
    pub async fn wait_for_ready(
        &self,
        user_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<SessionSnapshot> {
        self.wait_until(user_id, timeout, poll_interval, |snapshot| {
            snapshot.state == SessionState::Ready
        })
        .await
    }

    /// Bounded wait until the session produces a challenge or becomes
    /// ready, whichever comes first. Used right after an auto-init so the
    /// QR endpoint has something to show.
    pub async fn wait_for_challenge(
        &self,
        user_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<SessionSnapshot> {
        self.wait_until(user_id, timeout, poll_interval, |snapshot| {
            snapshot.state == SessionState::Ready || snapshot.last_qr.is_some()
        })
        .await
    }

    async fn wait_until<F>(
        &self,
        user_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        done: F,
    ) -> Option<SessionSnapshot>
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.store.snapshot(user_id).await;
            let finished = snapshot.as_ref().map(&done).unwrap_or(false);
            if finished || Instant::now() >= deadline {
                return snapshot;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Tear the session down and purge its on-disk authentication store.
    ///
    /// The record is claimed (removed) first, so the user is absent to
    /// every reader from the start and a racing `init` begins a clean
    /// session instead of touching a dying one. Teardown failures are
    /// logged and swallowed: the caller's guarantee is removal from the
    /// store plus an attempted delete of the auth artifacts, regardless of
    /// how the underlying client's shutdown behaves.
    pub async fn logout(&self, user_id: &str) -> Result<(), GatewayError> {
        if let Some(mut record) = self.store.remove(user_id).await {
            // Detach first: no late event may mutate a record being destroyed.
            if let Some(pump) = record.pump.take() {
                pump.abort();
            }
            if let Some(client) = record.client.take() {
                if let Err(err) = client.logout().await {
                    tracing::warn!(user_id, error = %err, "graceful logout failed, continuing teardown");
                }
                client.close().await;
                tracing::info!(user_id, "client destroyed");
            }
            tokio::time::sleep(TEARDOWN_GRACE).await;
        }

        let auth_dir = self.config.auth_dir_for(user_id);
        match tokio::fs::remove_dir_all(&auth_dir).await {
            Ok(()) => tracing::info!(user_id, "auth store deleted"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    user_id,
                    path = %auth_dir.display(),
                    error = %err,
                    "failed to delete auth store"
                );
            }
        }

        Ok(())
    }
}

/// Single consumer of a session's client events.
///
/// One pump per session is what guarantees per-user emission-order
/// application; it ends when the adapter closes the channel or when the
/// record disappears (logout aborts it anyway, this is the backstop).
async fn pump_events(store: SessionStore, user_id: String, mut events: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        let applied = store
            .update(&user_id, |record| record.apply_event(event))
            .await;
        if !applied {
            tracing::debug!(user_id = %user_id, "session removed, stopping event pump");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AccountIdentity;

    fn manager_with(config: Config) -> SessionManager {
        SessionManager::new(SessionStore::new(), Arc::new(config))
    }

    fn test_manager() -> (SessionManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            auth_dir: dir.path().join("auth"),
            temp_dir: dir.path().join("tmp"),
            ..Config::default()
        };
        (manager_with(config), dir)
    }

    fn identity() -> AccountIdentity {
        AccountIdentity {
            id: "15551234567@c.us".into(),
            name: None,
            phone_number: Some("15551234567".into()),
        }
    }

    #[tokio::test]
    async fn test_init_rejects_missing_user_id() {
        let (manager, _dir) = test_manager();
        for user_id in ["", "   "] {
            let err = manager.init(user_id).await.unwrap_err();
            assert!(matches!(err, GatewayError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn test_init_is_idempotent_for_existing_session() {
        let (manager, _dir) = test_manager();
        manager.store().reserve("u1").await;

        // The reservation is held, so init must not launch a second client;
        // it resolves to the in-flight record.
        let snapshot = manager.init("u1").await.unwrap();
        assert_eq!(snapshot.user_id, "u1");
        assert_eq!(snapshot.state, SessionState::Initializing);
    }

    #[tokio::test]
    async fn test_status_of_unknown_user_is_none() {
        let (manager, _dir) = test_manager();
        assert!(manager.status("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_ready_returns_early() {
        let (manager, _dir) = test_manager();
        manager.store().reserve("u1").await;

        let store = manager.store().clone();
        let flip = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            store
                .update("u1", |record| {
                    record.apply_event(ClientEvent::Ready(identity()));
                })
                .await;
        });

        let snapshot = manager
            .wait_for_ready("u1", Duration::from_secs(5), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(snapshot.is_ready);
        flip.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_ready_times_out_with_current_snapshot() {
        let (manager, _dir) = test_manager();
        manager.store().reserve("u1").await;

        let snapshot = manager
            .wait_for_ready("u1", Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(snapshot.state, SessionState::Initializing);
    }

    #[tokio::test]
    async fn test_wait_for_challenge_stops_on_qr() {
        let (manager, _dir) = test_manager();
        manager.store().reserve("u1").await;
        manager
            .store()
            .update("u1", |record| {
                record.apply_event(ClientEvent::Qr("code-1".into()));
            })
            .await;

        let snapshot = manager
            .wait_for_challenge("u1", Duration::from_secs(5), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(snapshot.last_qr.as_deref(), Some("code-1"));
    }

    #[tokio::test]
    async fn test_logout_removes_record_and_auth_store() {
        let (manager, _dir) = test_manager();
        manager.store().reserve("u1").await;
        manager
            .store()
            .update("u1", |record| {
                record.apply_event(ClientEvent::Ready(identity()));
            })
            .await;

        let auth_dir = manager.config.auth_dir_for("u1");
        tokio::fs::create_dir_all(&auth_dir).await.unwrap();

        manager.logout("u1").await.unwrap();
        assert!(manager.status("u1").await.is_none());
        assert!(!auth_dir.exists());
    }

    #[tokio::test]
    async fn test_logout_of_unknown_user_still_purges_auth_store() {
        let (manager, _dir) = test_manager();
        let auth_dir = manager.config.auth_dir_for("ghost");
        tokio::fs::create_dir_all(&auth_dir).await.unwrap();

        manager.logout("ghost").await.unwrap();
        assert!(!auth_dir.exists());

        // And a logout with nothing at all to do still succeeds.
        manager.logout("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_event_pump_applies_in_order_and_stops_after_removal() {
        let (manager, _dir) = test_manager();
        let store = manager.store().clone();
        store.reserve("u1").await;

        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(pump_events(store.clone(), "u1".into(), rx));

        tx.send(ClientEvent::Qr("code-1".into())).await.unwrap();
        tx.send(ClientEvent::Qr("code-2".into())).await.unwrap();
        tx.send(ClientEvent::Ready(identity())).await.unwrap();
        drop(tx);
        pump.await.unwrap();

        let snapshot = store.snapshot("u1").await.unwrap();
        assert!(snapshot.is_ready);
        assert!(snapshot.last_qr.is_none());
    }
}
