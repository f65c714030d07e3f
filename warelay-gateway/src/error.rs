//! Error types for warelay-gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Gateway service errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session not ready: {0}")]
    NotReady(String),

    #[error("No client found for user {0}")]
    NoClient(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Media download failed: {0}")]
    Download(String),

    #[error("Media transcode failed: {0}")]
    Transcode(String),

    #[error("Message send failed: {0}")]
    Send(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code for API responses.
    fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidArgument(_) => "INVALID_ARGUMENT",
            GatewayError::NotReady(_) => "SESSION_NOT_READY",
            GatewayError::NoClient(_) => "NO_CLIENT",
            GatewayError::Launch(_) => "BROWSER_UNAVAILABLE",
            GatewayError::Download(_) => "DOWNLOAD_FAILED",
            GatewayError::Transcode(_) => "TRANSCODE_FAILED",
            GatewayError::Send(_) => "SEND_FAILED",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotReady(_) | GatewayError::NoClient(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Launch(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
