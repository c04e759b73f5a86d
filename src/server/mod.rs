//! HTTP surface: the JSON-RPC skill endpoint plus read-only game views.
//!
//! CORS is open so browser spectators can read `/api/*` directly.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// Serve on `port` until `shutdown` resolves.
pub async fn serve(state: AppState, port: u16, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!(port, "Game server listening on http://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Game server error")
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/a2a", post(routes::a2a))
        .route("/api/game", get(routes::get_game))
        .route("/api/history", get(routes::get_history))
        .route("/.well-known/agent-card.json", get(routes::agent_card))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
