//! HTTP transport exposing the OpenAI-compatible API.
//!
//! | Route                         | Handler                                  |
//! |-------------------------------|------------------------------------------|
//! | `POST /v1/chat/completions`   | [`completions::chat_completions`]        |
//! | `GET /v1/models`              | [`completions::list_models`]             |
//! | `GET /health`                 | [`completions::health`]                  |
//!
//! Each completion request gets its own [`ProcessSession`](crate::process::ProcessSession)
//! and translator; nothing is shared between requests except [`AppState`].

pub mod completions;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GlobalConfig;
use crate::process::SpawnConfig;
use crate::{AppError, Result};

/// Shared, read-only state for all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Launch settings derived from `config`.
    pub spawn: SpawnConfig,
}

impl AppState {
    /// Build state from a validated configuration.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        let spawn = SpawnConfig::from(&config);
        Self {
            config: Arc::new(config),
            spawn,
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(completions::chat_completions))
        .route("/v1/models", get(completions::list_models))
        .route("/health", get(completions::health))
        .with_state(state)
}

/// Serve on `config.host:config.http_port` until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or the server fails
/// to bind.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind: SocketAddr = format!("{}:{}", state.config.host, state.config.http_port)
        .parse()
        .map_err(|err| AppError::Config(format!("invalid bind address: {err}")))?;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))?;

    serve_listener(listener, state, ct).await
}

/// Serve on an already bound listener until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the server stops with an error.
pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(bind = %local, cli = %state.spawn.cli_binary, "starting HTTP transport");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("HTTP server error: {err}")))?;

    info!("HTTP transport shut down");
    Ok(())
}
