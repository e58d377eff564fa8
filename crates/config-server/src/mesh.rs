//! Mesh configuration loading.

use crate::errors::ServerError;
use std::path::Path;
use tracing::debug;

/// Load the mesh configuration document as JSON.
///
/// An empty path means the server runs without mesh config and yields
/// `Ok(None)`. An empty file yields an empty object.
///
/// # Errors
///
/// Returns [`ServerError::MeshConfig`] if the file cannot be read or is not a
/// YAML mapping.
pub fn load_mesh_config(path: &Path) -> Result<Option<serde_json::Value>, ServerError> {
    if path.as_os_str().is_empty() {
        return Ok(None);
    }

    let shown = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| ServerError::MeshConfig {
        path: shown.clone(),
        message: e.to_string(),
    })?;

    if text.trim().is_empty() {
        debug!(target: "config_server.mesh", path = %shown, "Mesh config file is empty");
        return Ok(Some(serde_json::Value::Object(serde_json::Map::new())));
    }

    let value: serde_json::Value =
        serde_yaml::from_str(&text).map_err(|e| ServerError::MeshConfig {
            path: shown.clone(),
            message: e.to_string(),
        })?;

    if !value.is_object() {
        return Err(ServerError::MeshConfig {
            path: shown,
            message: "mesh config must be a mapping".to_string(),
        });
    }

    debug!(target: "config_server.mesh", path = %shown, "Loaded mesh config");
    Ok(Some(value))
}
