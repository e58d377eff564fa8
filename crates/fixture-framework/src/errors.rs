//! Fixture framework error types.
//!
//! Errors fall into four groups:
//! - Setup: `Io`, `Server`, `Discovery`, `PortNotFound`, `Tunnel`,
//!   `Manifest`, `Config`. Fatal to construction.
//! - `ReadinessTimeout`: a bounded wait expired. Also fatal to construction,
//!   but reported distinctly so callers can tell "broken" from "slow".
//! - Config application: `Namespace`, `Io`. The batch may be partially
//!   applied.
//! - `Multiple`: several independent close/teardown steps failed.

use crate::environment::EnvironmentKind;
use crate::resource::ResourceId;
use common::error::ErrorList;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fixture framework error type.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// Filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backing server failed to start or stop.
    #[error("Server error: {0}")]
    Server(#[from] config_server::ServerError),

    /// Baseline manifest extraction failed.
    #[error("Manifest extraction failed: {0}")]
    Manifest(String),

    /// Pod or service discovery failed.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// The named port is not exposed by the service.
    #[error("Failed to get target port '{port_name}' in service {service}")]
    PortNotFound { service: String, port_name: String },

    /// Port-forward tunnel failed.
    #[error("Tunnel error: {0}")]
    Tunnel(String),

    /// Request to a component endpoint failed.
    #[error("Client error: {0}")]
    Client(String),

    /// Namespace rewrite failed.
    #[error("Namespace rewrite failed: {0}")]
    Namespace(String),

    /// Framework configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A bounded wait expired.
    #[error("Timed out after {timeout:?} waiting for {what}: {last_error}")]
    ReadinessTimeout {
        what: String,
        timeout: Duration,
        last_error: String,
    },

    /// Operation is not available in the active environment.
    #[error("{operation} is not supported by {resource} in the {environment} environment")]
    Unsupported {
        operation: &'static str,
        resource: ResourceId,
        environment: EnvironmentKind,
    },

    /// Operation on a closed (or never-started) instance.
    #[error("{0} is closed")]
    Closed(ResourceId),

    /// Several independent steps failed.
    #[error("{0}")]
    Multiple(ErrorList<FixtureError>),
}

impl FixtureError {
    /// Build an [`FixtureError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FixtureError::Io {
            path: path.into(),
            source,
        }
    }

    /// True if this is (or only contains) a readiness timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            FixtureError::ReadinessTimeout { .. } => true,
            FixtureError::Multiple(list) => list.iter().all(FixtureError::is_timeout),
            _ => false,
        }
    }
}

/// Collapse collected close errors: none is `Ok`, one is returned as-is,
/// several become [`FixtureError::Multiple`].
pub(crate) fn collapse(errors: ErrorList<FixtureError>) -> Result<(), FixtureError> {
    errors.into_result(FixtureError::Multiple)
}
