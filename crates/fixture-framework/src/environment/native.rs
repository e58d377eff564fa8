//! Native (in-process) environment.

use crate::config::{FrameworkConfig, Timeouts};
use crate::deployment::{BundledManifestExtractor, ManifestExtractor};
use crate::errors::FixtureError;
use async_trait::async_trait;
use config_server::{Server, ServerArgs};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

/// A running backing server.
#[async_trait]
pub trait ServerHandle: Send {
    /// Address the API listener is bound to, if serving.
    fn address(&self) -> Option<SocketAddr>;

    /// Stop the server and wait for its tasks. Idempotent.
    async fn close(&mut self) -> Result<(), FixtureError>;
}

/// Starts backing servers.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn start(&self, args: ServerArgs) -> Result<Box<dyn ServerHandle>, FixtureError>;
}

#[async_trait]
impl ServerHandle for Server {
    fn address(&self) -> Option<SocketAddr> {
        Server::address(self)
    }

    async fn close(&mut self) -> Result<(), FixtureError> {
        Server::close(self).await.map_err(FixtureError::from)
    }
}

/// Runs the config server inside the test process.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedServerLauncher;

#[async_trait]
impl ServerLauncher for EmbeddedServerLauncher {
    async fn start(&self, args: ServerArgs) -> Result<Box<dyn ServerHandle>, FixtureError> {
        let server = Server::start(args).await?;
        debug!(address = ?server.address(), "Embedded config server started");
        Ok(Box::new(server))
    }
}

/// Collaborators for running components in-process.
#[derive(Clone)]
pub struct NativeEnvironment {
    launcher: Arc<dyn ServerLauncher>,
    manifests: Arc<dyn ManifestExtractor>,
    timeouts: Timeouts,
}

impl NativeEnvironment {
    pub fn new(
        launcher: Arc<dyn ServerLauncher>,
        manifests: Arc<dyn ManifestExtractor>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            launcher,
            manifests,
            timeouts,
        }
    }

    /// Embedded config server plus the bundled (or overridden) manifest.
    pub fn from_config(config: &FrameworkConfig) -> Self {
        Self::new(
            Arc::new(EmbeddedServerLauncher),
            Arc::new(BundledManifestExtractor::from_config(config)),
            config.timeouts,
        )
    }

    /// Start a backing server.
    ///
    /// # Errors
    ///
    /// Propagates the launcher's failure.
    pub async fn start_server(&self, args: ServerArgs) -> Result<Box<dyn ServerHandle>, FixtureError> {
        self.launcher.start(args).await
    }

    pub fn manifest_extractor(&self) -> &Arc<dyn ManifestExtractor> {
        &self.manifests
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }
}

/// Address a client can dial for a listener bound to `addr`.
///
/// A listener on the unspecified address accepts on loopback, which is the
/// only interface a same-process client should use.
pub fn dialable_address(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dialable_address_maps_unspecified_to_loopback() {
        let v4: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        assert_eq!(dialable_address(v4), "127.0.0.1:4000".parse().unwrap());

        let v6: SocketAddr = "[::]:4000".parse().unwrap();
        assert_eq!(dialable_address(v6), "[::1]:4000".parse().unwrap());

        let bound: SocketAddr = "10.1.2.3:4000".parse().unwrap();
        assert_eq!(dialable_address(bound), bound);
    }

    #[tokio::test]
    async fn test_embedded_launcher_starts_and_closes_server() {
        let dir = tempfile::tempdir().unwrap();
        let args = ServerArgs {
            insecure: true,
            disable_resource_ready_check: true,
            config_path: dir.path().to_path_buf(),
            introspection_port: None,
            api_address: "tcp://127.0.0.1:0".to_string(),
            ..ServerArgs::default()
        };

        let mut handle = EmbeddedServerLauncher.start(args).await.unwrap();
        let addr = handle.address().unwrap();
        assert_ne!(addr.port(), 0);

        handle.close().await.unwrap();
        handle.close().await.unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
