//! HTTP binding of the session operations.
//!
//! Two ways to drive a session share one [`SessionManager`]:
//!
//! - a polling JSON API (`/api/session`, `/api/input`, `/api/output`,
//!   `/api/resize`), where each `/api/output` call is the client's heartbeat;
//! - a WebSocket push channel at `/api/stream/{session_id}`.
//!
//! Everything except `/health` sits behind the [`OwnerGate`].

pub mod auth;
pub mod error;
pub mod handlers;
pub mod stream;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub use auth::OwnerGate;
pub use error::ApiError;

use crate::session::SessionManager;

/// State shared by every handler.
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub gate: OwnerGate,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, gate: OwnerGate) -> Arc<Self> {
        Arc::new(Self { manager, gate })
    }
}

/// Builds the complete API router.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/api/session",
            post(handlers::create_session).delete(handlers::close_session),
        )
        .route("/api/input", post(handlers::send_input))
        .route("/api/output", post(handlers::drain_output))
        .route("/api/resize", post(handlers::resize))
        .route("/api/stream/{session_id}", get(stream::stream_session))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_owner,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP server listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
