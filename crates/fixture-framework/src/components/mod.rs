//! Components: test fixtures exposing a config server endpoint.
//!
//! Test code is written once against [`Instance`] and runs against either
//! environment. [`new_component`] picks the variant from the context's
//! environment:
//!
//! - [`NativeComponent`] runs an embedded config server over a scratch
//!   config directory and supports config mutation and [`Instance::reset`].
//! - [`KubeComponent`] tunnels to a config server already running in the
//!   cluster. Config is applied through the cluster, so only identity,
//!   address, snapshot waits and close are available.

pub mod client;
pub mod factory;
pub mod kube;
pub mod native;

pub use client::Client;
pub use factory::new_component;
pub use kube::KubeComponent;
pub use native::NativeComponent;

use crate::environment::EnvironmentKind;
use crate::errors::FixtureError;
use crate::namespace::Namespace;
use crate::resource::Resource;
use async_trait::async_trait;
use std::path::Path;

/// Service the kube variant attaches to.
pub const DEFAULT_SERVICE_NAME: &str = "config-server";

/// Named service port carrying the config server API.
pub const DEFAULT_PORT_NAME: &str = "http-api";

/// Label selector for the config server pod.
pub const DEFAULT_POD_SELECTOR: &str = "app=config-server";

/// Where the kube variant finds the remote config server.
#[derive(Clone, PartialEq, Eq)]
pub struct KubeTarget {
    pub service_name: String,
    pub port_name: String,
    pub pod_selector: String,
    /// Bearer token, when the remote server runs in secure mode.
    pub access_token: Option<String>,
}

impl Default for KubeTarget {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            port_name: DEFAULT_PORT_NAME.to_string(),
            pod_selector: DEFAULT_POD_SELECTOR.to_string(),
            access_token: None,
        }
    }
}

impl std::fmt::Debug for KubeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTarget")
            .field("service_name", &self.service_name)
            .field("port_name", &self.port_name)
            .field("pod_selector", &self.pod_selector)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Immutable input a component is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentConfig {
    /// Mesh configuration document served by the native variant.
    pub mesh_config: String,
    /// Discovery target for the kube variant.
    pub kube: KubeTarget,
}

/// A running component.
///
/// Operations a variant does not support return
/// [`FixtureError::Unsupported`].
#[async_trait]
pub trait Instance: Resource {
    /// Environment this instance runs in.
    fn environment(&self) -> EnvironmentKind;

    /// `host:port` of the component's API. Stable from successful
    /// construction until close.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Closed`] if the instance is not running.
    fn address(&self) -> Result<String, FixtureError>;

    /// Write each document into the live config, rewritten into `namespace`
    /// when one is given. Stops at the first failure, leaving earlier
    /// documents applied.
    async fn apply_config(
        &self,
        _namespace: Option<&dyn Namespace>,
        _documents: &[&str],
    ) -> Result<(), FixtureError> {
        Err(self.unsupported("apply_config"))
    }

    /// Mirror `source_dir` into the live config, rewriting file contents
    /// into `namespace` when one is given.
    async fn apply_config_dir(
        &self,
        _namespace: Option<&dyn Namespace>,
        _source_dir: &Path,
    ) -> Result<(), FixtureError> {
        Err(self.unsupported("apply_config_dir"))
    }

    /// Remove all applied config, leaving only the baseline manifest.
    async fn clear_config(&self) -> Result<(), FixtureError> {
        Err(self.unsupported("clear_config"))
    }

    /// Block until the served snapshot of `collection` holds exactly
    /// `expected` (in any order).
    async fn wait_for_snapshot(
        &self,
        _collection: &str,
        _expected: &[serde_json::Value],
    ) -> Result<(), FixtureError> {
        Err(self.unsupported("wait_for_snapshot"))
    }

    /// Tear down and rebuild the backing server from scratch.
    async fn reset(&self) -> Result<(), FixtureError> {
        Err(self.unsupported("reset"))
    }

    #[doc(hidden)]
    fn unsupported(&self, operation: &'static str) -> FixtureError {
        FixtureError::Unsupported {
            operation,
            resource: self.id(),
            environment: self.environment(),
        }
    }
}
