//! Kube component: a tunnel to a config server running in the cluster.

use super::{Client, ComponentConfig, Instance, KubeTarget};
use crate::environment::{EnvironmentKind, KubeEnvironment};
use crate::errors::{collapse, FixtureError};
use crate::kube::{PodSelectOptions, PortForwarder};
use crate::resource::{Resource, ResourceId};
use async_trait::async_trait;
use common::error::ErrorList;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Label kube components are registered under.
pub const KUBE_COMPONENT_LABEL: &str = "kube-component";

#[derive(Default)]
struct KubeState {
    forwarder: Option<Box<dyn PortForwarder>>,
    client: Option<Arc<Client>>,
}

/// Component reached through a port-forward tunnel. It does not own the
/// remote process; a new instance is created instead of resetting.
pub struct KubeComponent {
    id: ResourceId,
    target: KubeTarget,
    environment: KubeEnvironment,
    state: Mutex<KubeState>,
    address: RwLock<Option<String>>,
}

impl KubeComponent {
    /// An unconnected component; [`KubeComponent::connect`] attaches it.
    pub fn new(id: ResourceId, config: ComponentConfig, environment: KubeEnvironment) -> Self {
        Self {
            id,
            target: config.kube,
            environment,
            state: Mutex::new(KubeState::default()),
            address: RwLock::new(None),
        }
    }

    /// Discover the pod, resolve the service port, open the tunnel and
    /// confirm the remote server answers.
    ///
    /// Anything opened before a failure is closed again before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the discovery, port lookup, tunnel or readiness failure.
    #[instrument(skip_all, fields(resource = %self.id))]
    pub async fn connect(&self) -> Result<(), FixtureError> {
        let mut state = self.state.lock().await;
        if state.forwarder.is_some() {
            return Err(FixtureError::Tunnel(format!("{} is already connected", self.id)));
        }

        match self.establish(&mut state).await {
            Ok(address) => {
                info!(address = %address, "Kube component connected");
                *self.address.write().unwrap_or_else(PoisonError::into_inner) = Some(address);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = close_state(&mut state).await {
                    warn!(error = %close_err, "Failed to unwind partial connection");
                }
                Err(e)
            }
        }
    }

    async fn establish(&self, state: &mut KubeState) -> Result<String, FixtureError> {
        let namespace = self.environment.deployment_config().system_namespace().to_string();

        let fetch = self
            .environment
            .new_single_pod_fetch(&namespace, &self.target.pod_selector);
        let pods = self.environment.wait_until_pods_are_ready(&fetch).await?;
        let pod = pods.into_iter().next().ok_or_else(|| {
            FixtureError::Discovery(format!(
                "no pod matching '{}' in namespace {}",
                self.target.pod_selector, namespace
            ))
        })?;

        let service = self
            .environment
            .get_service(&namespace, &self.target.service_name)
            .await?;
        let remote_port = service.target_port(&self.target.port_name)?;
        debug!(pod = %pod.name, remote_port, "Resolved config server endpoint");

        let options = PodSelectOptions {
            pod_namespace: pod.namespace.clone(),
            pod_name: pod.name.clone(),
        };
        let forwarder = state.forwarder.insert(
            self.environment.new_port_forwarder(&options, 0, remote_port)?,
        );
        forwarder.start().await?;
        let address = forwarder.address()?;

        let client = Arc::new(
            Client::new(self.id.clone(), &address, self.environment.timeouts())?
                .with_access_token(self.target.access_token.clone()),
        );
        state.client = Some(client.clone());
        client.wait_for_startup().await?;

        Ok(address)
    }

    /// Client for the tunnel, if connected.
    pub async fn client(&self) -> Option<Arc<Client>> {
        self.state.lock().await.client.clone()
    }
}

/// Close the client, then the tunnel, collecting both failures.
async fn close_state(state: &mut KubeState) -> Result<(), FixtureError> {
    let mut errors = ErrorList::new();
    if let Some(client) = state.client.take() {
        errors.push_result(client.close().await);
    }
    if let Some(mut forwarder) = state.forwarder.take() {
        errors.push_result(forwarder.close().await);
    }
    collapse(errors)
}

#[async_trait]
impl Resource for KubeComponent {
    fn id(&self) -> ResourceId {
        self.id.clone()
    }

    #[instrument(skip_all, fields(resource = %self.id))]
    async fn close(&self) -> Result<(), FixtureError> {
        *self.address.write().unwrap_or_else(PoisonError::into_inner) = None;
        let mut state = self.state.lock().await;
        let result = close_state(&mut state).await;
        debug!(ok = result.is_ok(), "Kube component closed");
        result
    }
}

#[async_trait]
impl Instance for KubeComponent {
    fn environment(&self) -> EnvironmentKind {
        EnvironmentKind::Kube
    }

    fn address(&self) -> Result<String, FixtureError> {
        self.address
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| FixtureError::Closed(self.id.clone()))
    }

    async fn wait_for_snapshot(
        &self,
        collection: &str,
        expected: &[serde_json::Value],
    ) -> Result<(), FixtureError> {
        let client = self
            .state
            .lock()
            .await
            .client
            .clone()
            .ok_or_else(|| FixtureError::Closed(self.id.clone()))?;
        client.wait_for_snapshot(collection, expected).await
    }
}
