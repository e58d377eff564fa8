//! HTTP routes for the config server.
//!
//! Defines the Axum routers and application state.

use crate::args::ServerArgs;
use crate::errors::ServerError;
use crate::handlers;
use crate::snapshot::SnapshotStore;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
pub struct AppState {
    /// Latest scanned config.
    pub store: Arc<SnapshotStore>,

    /// Parsed mesh configuration, if one was configured.
    pub mesh_config: Option<serde_json::Value>,

    /// Arguments the server was started with.
    pub args: ServerArgs,
}

/// Build the API routes.
///
/// Creates an Axum router with:
/// - `/v1/health` - Readiness (unauthenticated, used by readiness checks)
/// - `/v1/snapshots` - Per-collection snapshot
/// - `/v1/meshconfig` - Mesh configuration
/// - Bearer token check on `/v1/snapshots` and `/v1/meshconfig` unless insecure
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>) -> Router {
    let protected_routes = Router::new()
        .route("/v1/snapshots", get(handlers::get_snapshot))
        .route("/v1/meshconfig", get(handlers::get_mesh_config))
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    let public_routes = Router::new().route("/v1/health", get(handlers::health_check));

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    public_routes
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

/// Build the introspection routes (`/debug/vars`).
pub fn build_introspection_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/debug/vars", get(handlers::debug_vars))
        .with_state(state)
}

/// Reject requests without the configured bearer token.
async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if state.args.insecure {
        return Ok(next.run(request).await);
    }

    let expected = state
        .args
        .access_token
        .as_deref()
        .ok_or(ServerError::Unauthorized)?;

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => Err(ServerError::Unauthorized),
    }
}
