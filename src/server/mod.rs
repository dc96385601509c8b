//! HTTP surface: the push channel, alert management and a liveness probe.

pub mod api;
pub mod auth;
pub mod ratelimit;
pub mod ws;

use std::future::Future;
use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::core::alerts::AlertManager;
use crate::core::config::Config;
use crate::core::telemetry::SnapshotHub;
use auth::TokenDigest;

/// Shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SnapshotHub>,
    pub alerts: AlertManager,
    /// `None` disables authentication.
    pub token: Option<TokenDigest>,
    pub allowed_origins: Arc<Vec<String>>,
    /// Cancelled on shutdown; every subscriber session listens to it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(hub: Arc<SnapshotHub>, alerts: AlertManager, config: &Config) -> Self {
        Self {
            hub,
            alerts,
            token: config.token.as_deref().map(TokenDigest::new),
            allowed_origins: Arc::new(config.allowed_origins.clone()),
            shutdown: CancellationToken::new(),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/api/alerts", api::routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// Serve until `signal` resolves, then close every subscriber session.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sessions = state.shutdown.clone();
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            log::info!("Shutdown requested, closing subscriber sessions");
            sessions.cancel();
        })
        .await
}
