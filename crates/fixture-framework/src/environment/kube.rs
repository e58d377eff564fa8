//! Kubernetes environment.

use crate::config::{FrameworkConfig, Timeouts};
use crate::deployment::DeploymentConfig;
use crate::errors::FixtureError;
use crate::eventual::wait_until;
use crate::kube::{ClusterAccessor, KubectlAccessor, Pod, PodSelectOptions, PortForwarder, Service};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Fetches the set of pods a readiness wait is about.
#[async_trait]
pub trait PodFetch: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Pod>, FixtureError>;

    /// What is being fetched, for error messages.
    fn describe(&self) -> String;
}

/// Fetches pods by selector and insists on exactly one match.
pub struct SinglePodFetch {
    accessor: Arc<dyn ClusterAccessor>,
    namespace: String,
    selector: String,
}

#[async_trait]
impl PodFetch for SinglePodFetch {
    async fn fetch(&self) -> Result<Vec<Pod>, FixtureError> {
        let pods = self.accessor.get_pods(&self.namespace, &self.selector).await?;
        if pods.len() != 1 {
            return Err(FixtureError::Discovery(format!(
                "expected exactly one pod matching '{}' in namespace {}, found {}",
                self.selector,
                self.namespace,
                pods.len()
            )));
        }
        Ok(pods)
    }

    fn describe(&self) -> String {
        format!("pod '{}' in namespace {}", self.selector, self.namespace)
    }
}

/// Collaborators for reaching components deployed in a cluster.
#[derive(Clone)]
pub struct KubeEnvironment {
    accessor: Arc<dyn ClusterAccessor>,
    deployment: DeploymentConfig,
    timeouts: Timeouts,
}

impl KubeEnvironment {
    pub fn new(
        accessor: Arc<dyn ClusterAccessor>,
        deployment: DeploymentConfig,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            accessor,
            deployment,
            timeouts,
        }
    }

    /// `kubectl`-backed environment.
    pub fn from_config(config: &FrameworkConfig) -> Self {
        Self::new(
            Arc::new(KubectlAccessor::from_config(config)),
            DeploymentConfig::from_config(config),
            config.timeouts,
        )
    }

    pub fn accessor(&self) -> &Arc<dyn ClusterAccessor> {
        &self.accessor
    }

    pub fn deployment_config(&self) -> &DeploymentConfig {
        &self.deployment
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Fetch that succeeds only when `selector` matches exactly one pod.
    pub fn new_single_pod_fetch(&self, namespace: &str, selector: &str) -> SinglePodFetch {
        SinglePodFetch {
            accessor: self.accessor.clone(),
            namespace: namespace.to_string(),
            selector: selector.to_string(),
        }
    }

    /// Poll `fetch` until it returns a non-empty set of pods that are all
    /// ready.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::ReadinessTimeout`] carrying the last fetch
    /// failure or not-ready pod once the pod-ready timeout passes.
    #[instrument(skip_all, fields(pods = %fetch.describe()))]
    pub async fn wait_until_pods_are_ready(
        &self,
        fetch: &dyn PodFetch,
    ) -> Result<Vec<Pod>, FixtureError> {
        let what = fetch.describe();
        let pods = wait_until(&what, self.timeouts.pod_ready, move || async move {
            let pods = fetch.fetch().await.map_err(|e| e.to_string())?;
            if pods.is_empty() {
                return Err("no pods found".to_string());
            }
            if let Some(pod) = pods.iter().find(|p| !p.is_ready()) {
                return Err(format!(
                    "pod {} is not ready (phase {})",
                    pod.name, pod.phase
                ));
            }
            Ok(pods)
        })
        .await?;

        debug!(count = pods.len(), "Pods ready");
        Ok(pods)
    }

    /// Look up a service.
    ///
    /// # Errors
    ///
    /// Propagates the accessor's discovery failure.
    pub async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, FixtureError> {
        self.accessor.get_service(namespace, name).await
    }

    /// Build an unstarted tunnel to `remote_port` on the selected pod.
    ///
    /// # Errors
    ///
    /// Propagates the accessor's failure.
    pub fn new_port_forwarder(
        &self,
        options: &PodSelectOptions,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Box<dyn PortForwarder>, FixtureError> {
        self.accessor.new_port_forwarder(options, local_port, remote_port)
    }
}
