//! Config server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::error::ErrorList;
use serde_json::json;
use thiserror::Error;

/// Config server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Start-up arguments are inconsistent.
    #[error("Invalid server arguments: {0}")]
    InvalidArgs(String),

    /// Binding a listener failed.
    #[error("Failed to bind {what} listener on {address}: {source}")]
    Bind {
        what: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the mesh config file failed.
    #[error("Failed to load mesh config from {path}: {message}")]
    MeshConfig { path: String, message: String },

    /// Scanning the config directory failed.
    #[error("Failed to scan config directory {path}: {message}")]
    Scan { path: String, message: String },

    /// A background task ended abnormally.
    #[error("Background task {task} failed: {message}")]
    Task { task: &'static str, message: String },

    /// Several shutdown steps failed.
    #[error("{0}")]
    Multiple(ErrorList<ServerError>),

    /// Request lacked a valid bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    /// Request was malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Server has not completed its first scan yet.
    #[error("Server not ready")]
    NotReady,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::MeshConfig { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
