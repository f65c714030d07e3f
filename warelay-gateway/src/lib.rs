//! warelay-gateway - WhatsApp Web session gateway.
//!
//! Manages one headless-browser WhatsApp Web session per user, exposes the
//! QR-handshake/readiness state over HTTP, and relays outbound video
//! messages through an authenticated session.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod media;
pub mod qr;
pub mod routes;
pub mod session;

pub use client::{ClientError, ClientEvent, WebClient};
pub use error::GatewayError;
pub use media::{MediaPipeline, SendMediaRequest, TempWorkArea};
pub use routes::{build_router, AppState};
pub use session::{
    AccountIdentity, SessionManager, SessionSnapshot, SessionState, SessionStore,
};
