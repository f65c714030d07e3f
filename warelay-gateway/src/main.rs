//! warelay-gateway service entry point.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use warelay_common::config::Config;
use warelay_common::logging::init_logging;
use warelay_gateway::{build_router, AppState, SessionManager};

/// Session brought up at startup so a single-tenant deployment is
/// immediately scannable.
const DEFAULT_SESSION_ID: &str = "main-session";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::from_env());
    init_logging(&config.log_level, &config.log_format);

    tracing::info!("warelay gateway v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::new(config.clone());

    // The façade is consumed by a browser frontend; CORS is wide open.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = build_router(state.clone()).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting HTTP server on {}", addr);

    // Bring the default session up in the background; a failed launch is
    // reported through /qr and /status rather than aborting the process.
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        match sessions.init(DEFAULT_SESSION_ID).await {
            Ok(_) => tracing::info!(user_id = DEFAULT_SESSION_ID, "default session initialized"),
            Err(err) => tracing::error!(
                user_id = DEFAULT_SESSION_ID,
                error = %err,
                "failed to initialize default session"
            ),
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.sessions.clone()))
        .await?;

    Ok(())
}

/// Wait for interrupt, then log the default session out best-effort before
/// the process exits.
async fn shutdown_signal(sessions: SessionManager) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down, logging out the default session");
    if let Err(err) = sessions.logout(DEFAULT_SESSION_ID).await {
        tracing::warn!(error = %err, "default session logout failed during shutdown");
    }
}
