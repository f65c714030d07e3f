//! Adapter over the headless-browser chat client.
//!
//! Everything the core knows about the automation layer crosses this seam
//! as typed values: [`ClientEvent`] for asynchronous session signals,
//! [`ClientError`] for failures. Known-noisy teardown errors from the
//! automation library never leave the adapter (see [`web`]).

pub mod chrome;
pub mod web;

pub use web::WebClient;

use crate::session::AccountIdentity;

/// Result type for client adapter operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Asynchronous signals from one user's underlying session, emitted in
/// observation order on a per-session channel.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The platform issued an authentication challenge to present out of
    /// band. A new payload obsoletes the previous one.
    Qr(String),
    /// The session is authenticated and can send messages.
    Ready(AccountIdentity),
    /// The platform revoked an authenticated session.
    AuthFailure(String),
    /// The browser transport is gone.
    Disconnected(String),
}

/// Client adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("media dispatch failed: {0}")]
    Send(String),
}
