//! HTTP handlers.

use crate::errors::ServerError;
use crate::routes::AppState;
use crate::snapshot::SnapshotResponse;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// Health check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: u64,
}

/// Introspection response served on `/debug/vars`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugVars {
    pub config_path: String,
    pub insecure: bool,
    pub ready: bool,
    pub version: u64,
    pub excluded_resource_kinds: Vec<String>,
    pub collections: BTreeMap<String, usize>,
}

/// Query parameters for the snapshot endpoint.
#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub collection: Option<String>,
}

/// Health check handler.
///
/// Returns 200 with the current snapshot version once the server is ready,
/// 503 before that.
#[instrument(skip_all, name = "config_server.health")]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ServerError> {
    if !state.store.is_ready() {
        return Err(ServerError::NotReady);
    }

    Ok(Json(HealthResponse {
        status: "ready".to_string(),
        version: state.store.version(),
    }))
}

/// Snapshot handler: `GET /v1/snapshots?collection=<name>`.
#[instrument(skip_all, name = "config_server.snapshot", fields(collection))]
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<SnapshotResponse>, ServerError> {
    let collection = query
        .collection
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ServerError::BadRequest("missing 'collection' parameter".to_string()))?;
    tracing::Span::current().record("collection", collection.as_str());

    if !state.store.is_ready() {
        return Err(ServerError::NotReady);
    }

    Ok(Json(state.store.snapshot(&collection)))
}

/// Mesh config handler: `GET /v1/meshconfig`.
#[instrument(skip_all, name = "config_server.meshconfig")]
pub async fn get_mesh_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state
        .mesh_config
        .clone()
        .map(Json)
        .ok_or_else(|| ServerError::MeshConfig {
            path: state.args.mesh_config_file.display().to_string(),
            message: "no mesh config configured".to_string(),
        })
}

/// Introspection handler: `GET /debug/vars`.
pub async fn debug_vars(State(state): State<Arc<AppState>>) -> Json<DebugVars> {
    Json(DebugVars {
        config_path: state.args.config_path.display().to_string(),
        insecure: state.args.insecure,
        ready: state.store.is_ready(),
        version: state.store.version(),
        excluded_resource_kinds: state.args.excluded_resource_kinds.clone(),
        collections: state.store.collection_counts(),
    })
}
