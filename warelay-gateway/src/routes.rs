//! HTTP API routes.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use warelay_common::config::Config;

use crate::error::GatewayError;
use crate::media::{MediaPipeline, SendMediaRequest};
use crate::qr;
use crate::session::{SessionManager, SessionStore};

/// How long `/qr` lets a freshly initialized session produce a challenge.
const QR_WAIT: Duration = Duration::from_secs(2);
/// Readiness bound applied by `/status`.
const STATUS_WAIT: Duration = Duration::from_secs(10);
/// Store sampling cadence for bounded waits.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub media: MediaPipeline,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let store = SessionStore::new();
        Self {
            sessions: SessionManager::new(store.clone(), config.clone()),
            media: MediaPipeline::new(store, config),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Authentication lifecycle
        .route("/qr/:user_id", get(fetch_qr))
        .route("/status/:user_id", get(fetch_status))
        .route("/me/:user_id", get(fetch_me))
        .route("/logout/:user_id", post(logout))
        // Outbound media
        .route("/send/:user_id", post(send_media))
        .with_state(state)
}

// ============ Health Check ============

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "warelay-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ============ Authentication Lifecycle ============

/// QR for a user, auto-initializing the session on first contact.
async fn fetch_qr(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let snapshot = match state.sessions.status(&user_id).await {
        Some(snapshot) => Some(snapshot),
        None => {
            tracing::info!(%user_id, "initializing session for QR request");
            state.sessions.init(&user_id).await?;
            state
                .sessions
                .wait_for_challenge(&user_id, QR_WAIT, POLL_INTERVAL)
                .await
        }
    };
    let snapshot = snapshot.ok_or_else(|| {
        GatewayError::Internal(format!("session for {user_id} vanished during initialization"))
    })?;

    // Already authenticated: no QR needed.
    if snapshot.is_ready {
        return Ok(Json(json!({
            "qr": null,
            "isReady": true,
            "message": "Already authenticated",
            "loggedInUser": snapshot.identity,
        })));
    }

    // Challenge on hand: render it.
    if let Some(payload) = &snapshot.last_qr {
        let data_url = qr::to_data_url(payload)?;
        return Ok(Json(json!({
            "qr": data_url,
            "isReady": false,
            "lastQrTime": snapshot.last_qr_time,
            "message": "Scan the QR code",
        })));
    }

    // Still waiting for the platform to issue one.
    Ok(Json(json!({
        "qr": null,
        "isReady": false,
        "message": "Waiting for QR...",
    })))
}

/// Readiness-bounded status report. Errors keep the `{isReady:false}`
/// shape the frontend polls against.
async fn fetch_status(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match status_body(&state, &user_id).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => {
            tracing::error!(%user_id, error = %err, "status request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "isReady": false, "message": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn status_body(
    state: &AppState,
    user_id: &str,
) -> Result<serde_json::Value, GatewayError> {
    if state.sessions.status(user_id).await.is_none() {
        tracing::info!(user_id, "initializing session for status request");
        state.sessions.init(user_id).await?;
    }

    let snapshot = state
        .sessions
        .wait_for_ready(user_id, STATUS_WAIT, POLL_INTERVAL)
        .await;

    Ok(match snapshot {
        Some(snapshot) => json!({
            "isReady": snapshot.is_ready,
            "lastQr": snapshot.last_qr,
            "lastQrTime": snapshot.last_qr_time,
            "loggedInUser": snapshot.identity,
            "message": if snapshot.is_ready { "Authenticated" } else { "Not ready yet" },
        }),
        None => json!({
            "isReady": false,
            "lastQr": null,
            "lastQrTime": null,
            "loggedInUser": null,
            "message": "Not ready yet",
        }),
    })
}

/// The authenticated account behind a ready session.
async fn fetch_me(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.sessions.status(&user_id).await {
        Some(snapshot) if snapshot.is_ready && snapshot.identity.is_some() => Json(json!({
            "success": true,
            "user": snapshot.identity,
        }))
        .into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "User not authenticated" })),
        )
            .into_response(),
    }
}

/// Tear the session down and delete its authentication store.
async fn logout(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    state.sessions.logout(&user_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Logged out and session deleted",
    })))
}

// ============ Outbound Media ============

#[derive(Debug, Deserialize)]
struct SendMediaBody {
    number: Option<String>,
    #[serde(rename = "videoUrl")]
    video_url: Option<String>,
    caption: Option<String>,
}

async fn send_media(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<SendMediaBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let missing = || GatewayError::InvalidArgument("number and videoUrl are required".into());
    let number = body
        .number
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(missing)?;
    let video_url = body
        .video_url
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(missing)?;

    // Make sure a session exists, then require it to be ready.
    if state.sessions.status(&user_id).await.is_none() {
        tracing::info!(%user_id, "initializing session for send request");
        state.sessions.init(&user_id).await?;
    }
    let ready = state
        .sessions
        .status(&user_id)
        .await
        .map(|snapshot| snapshot.is_ready)
        .unwrap_or(false);
    if !ready {
        return Err(GatewayError::NotReady(
            "not connected; scan the QR code first".into(),
        ));
    }

    state
        .media
        .send_media(&SendMediaRequest {
            user_id: user_id.clone(),
            destination: number.clone(),
            media_url: video_url,
            caption: body.caption,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Video sent to {number}"),
    })))
}
