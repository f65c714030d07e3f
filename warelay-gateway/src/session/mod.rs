//! Session records and the per-user lifecycle state machine.
//!
//! One [`SessionRecord`] exists per user at a time. Its state advances only
//! through [`SessionRecord::apply_event`], fed by a single event pump task
//! per session, so mutations for a user are applied strictly in emission
//! order.

pub mod manager;
pub mod store;

pub use manager::SessionManager;
pub use store::SessionStore;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::client::{ClientEvent, WebClient};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Client allocated, no signal from the platform yet.
    Initializing,
    /// The platform issued an authentication challenge (QR) to present.
    AwaitingScan,
    /// Authenticated; messages can be sent.
    Ready,
    /// The platform rejected the authenticated session.
    AuthFailed,
    /// The underlying transport is gone (network loss, remote logout).
    Disconnected,
}

/// The authenticated account behind a ready session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountIdentity {
    /// Serialized platform id, e.g. `15551234567@c.us`.
    pub id: String,
    /// Display name, when the platform exposes one.
    pub name: Option<String>,
    /// Bare phone number.
    #[serde(rename = "phoneNumber")]
    pub phone_number: Option<String>,
}

/// One user's session: the owning client handle plus observed state.
#[derive(Debug)]
pub struct SessionRecord {
    pub user_id: String,
    /// Owning handle to the underlying automation session. `None` only
    /// while a launch is in flight or after teardown has claimed it.
    pub(crate) client: Option<WebClient>,
    /// Event pump task feeding `apply_event`; aborted on logout.
    pub(crate) pump: Option<JoinHandle<()>>,
    pub state: SessionState,
    pub last_qr: Option<String>,
    pub last_qr_time: Option<DateTime<Utc>>,
    pub identity: Option<AccountIdentity>,
}

impl SessionRecord {
    /// Placeholder record inserted while a launch is in flight. Reserving
    /// the key first is what keeps concurrent inits from racing to create
    /// two clients for one user.
    pub(crate) fn reserved(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            client: None,
            pump: None,
            state: SessionState::Initializing,
            last_qr: None,
            last_qr_time: None,
            identity: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Advance the state machine with an event from the client adapter.
    ///
    /// Transitions outside the machine (e.g. a late `Disconnected` for a
    /// session that never became ready) are logged and dropped: events are
    /// observations, not commands.
    pub fn apply_event(&mut self, event: ClientEvent) {
        match (self.state, event) {
            // A fresh challenge overwrites the previous one; the old code is
            // expired the moment the platform rotates it.
            (SessionState::Initializing | SessionState::AwaitingScan, ClientEvent::Qr(code)) => {
                self.state = SessionState::AwaitingScan;
                self.last_qr = Some(code);
                self.last_qr_time = Some(Utc::now());
                tracing::info!(user_id = %self.user_id, "QR challenge issued");
            }
            (
                SessionState::Initializing | SessionState::AwaitingScan,
                ClientEvent::Ready(identity),
            ) => {
                self.state = SessionState::Ready;
                self.last_qr = None;
                self.last_qr_time = None;
                tracing::info!(user_id = %self.user_id, account = %identity.id, "session ready");
                self.identity = Some(identity);
            }
            (SessionState::Ready, ClientEvent::AuthFailure(reason)) => {
                self.state = SessionState::AuthFailed;
                self.identity = None;
                tracing::error!(user_id = %self.user_id, %reason, "authentication failure");
            }
            (
                SessionState::Ready | SessionState::AuthFailed,
                ClientEvent::Disconnected(reason),
            ) => {
                self.state = SessionState::Disconnected;
                self.identity = None;
                tracing::warn!(user_id = %self.user_id, %reason, "session disconnected");
            }
            (state, event) => {
                tracing::debug!(
                    user_id = %self.user_id,
                    ?state,
                    ?event,
                    "ignoring event outside the state machine"
                );
            }
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.user_id.clone(),
            state: self.state,
            is_ready: self.is_ready(),
            last_qr: self.last_qr.clone(),
            last_qr_time: self.last_qr_time,
            identity: self.identity.clone(),
        }
    }
}

/// Read-model projection of a [`SessionRecord`], safe to hand out.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub state: SessionState,
    pub is_ready: bool,
    pub last_qr: Option<String>,
    pub last_qr_time: Option<DateTime<Utc>>,
    pub identity: Option<AccountIdentity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AccountIdentity {
        AccountIdentity {
            id: "15551234567@c.us".into(),
            name: Some("Test".into()),
            phone_number: Some("15551234567".into()),
        }
    }

    #[test]
    fn test_qr_moves_to_awaiting_scan() {
        let mut record = SessionRecord::reserved("u1");
        record.apply_event(ClientEvent::Qr("code-1".into()));

        assert_eq!(record.state, SessionState::AwaitingScan);
        assert_eq!(record.last_qr.as_deref(), Some("code-1"));
        assert!(record.last_qr_time.is_some());
    }

    #[test]
    fn test_fresh_qr_overwrites_stale_one() {
        let mut record = SessionRecord::reserved("u1");
        record.apply_event(ClientEvent::Qr("code-1".into()));
        record.apply_event(ClientEvent::Qr("code-2".into()));

        assert_eq!(record.state, SessionState::AwaitingScan);
        assert_eq!(record.last_qr.as_deref(), Some("code-2"));
    }

    #[test]
    fn test_ready_clears_challenge_and_sets_identity() {
        let mut record = SessionRecord::reserved("u1");
        record.apply_event(ClientEvent::Qr("code-1".into()));
        record.apply_event(ClientEvent::Ready(identity()));

        assert_eq!(record.state, SessionState::Ready);
        assert!(record.is_ready());
        assert!(record.last_qr.is_none());
        assert!(record.last_qr_time.is_none());
        assert_eq!(record.identity, Some(identity()));
    }

    #[test]
    fn test_identity_present_iff_ready() {
        let mut record = SessionRecord::reserved("u1");
        assert!(record.identity.is_none());

        record.apply_event(ClientEvent::Ready(identity()));
        assert!(record.identity.is_some());

        record.apply_event(ClientEvent::AuthFailure("revoked".into()));
        assert_eq!(record.state, SessionState::AuthFailed);
        assert!(record.identity.is_none());
    }

    #[test]
    fn test_disconnect_from_ready_and_auth_failed() {
        let mut record = SessionRecord::reserved("u1");
        record.apply_event(ClientEvent::Ready(identity()));
        record.apply_event(ClientEvent::Disconnected("network".into()));
        assert_eq!(record.state, SessionState::Disconnected);

        let mut record = SessionRecord::reserved("u2");
        record.apply_event(ClientEvent::Ready(identity()));
        record.apply_event(ClientEvent::AuthFailure("revoked".into()));
        record.apply_event(ClientEvent::Disconnected("closed".into()));
        assert_eq!(record.state, SessionState::Disconnected);
    }

    #[test]
    fn test_events_outside_the_machine_are_dropped() {
        let mut record = SessionRecord::reserved("u1");

        // Disconnect before ever being ready: not a defined transition.
        record.apply_event(ClientEvent::Disconnected("early".into()));
        assert_eq!(record.state, SessionState::Initializing);

        // A QR after disconnect must not resurrect the session.
        record.apply_event(ClientEvent::Ready(identity()));
        record.apply_event(ClientEvent::Disconnected("network".into()));
        record.apply_event(ClientEvent::Qr("code-9".into()));
        assert_eq!(record.state, SessionState::Disconnected);
        assert!(record.last_qr.is_none());
    }

    #[test]
    fn test_snapshot_projects_record() {
        let mut record = SessionRecord::reserved("u1");
        record.apply_event(ClientEvent::Qr("code-1".into()));

        let snapshot = record.snapshot();
        assert_eq!(snapshot.user_id, "u1");
        assert_eq!(snapshot.state, SessionState::AwaitingScan);
        assert!(!snapshot.is_ready);
        assert_eq!(snapshot.last_qr.as_deref(), Some("code-1"));
    }
}
