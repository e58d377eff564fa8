//! Cluster access for the kube environment.
//!
//! The framework only needs a narrow slice of the Kubernetes API: list pods
//! by label selector, read a service's port list, and open a port-forward
//! tunnel to a pod. [`ClusterAccessor`] is that slice; [`KubectlAccessor`]
//! implements it by shelling out to `kubectl`.

pub mod kubectl;

pub use kubectl::KubectlAccessor;

use crate::errors::FixtureError;
use async_trait::async_trait;
use std::fmt;

/// Observed state of a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    /// Pod phase (`Pending`, `Running`, ...).
    pub phase: String,
    /// The pod's `Ready` condition is `True`.
    pub ready: bool,
}

impl Pod {
    /// Running with a true `Ready` condition.
    pub fn is_ready(&self) -> bool {
        self.phase == "Running" && self.ready
    }
}

/// A service port's target: a container port number or a container port
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPort {
    Number(u16),
    Name(String),
}

impl fmt::Display for TargetPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPort::Number(n) => write!(f, "{}", n),
            TargetPort::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: TargetPort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub ports: Vec<ServicePort>,
}

impl Service {
    /// Numeric container port behind the service port named `port_name`.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::PortNotFound`] if no port has that name, and
    /// [`FixtureError::Discovery`] if its target is a named or zero port,
    /// which cannot be forwarded to directly.
    pub fn target_port(&self, port_name: &str) -> Result<u16, FixtureError> {
        let port = self
            .ports
            .iter()
            .find(|p| p.name == port_name)
            .ok_or_else(|| FixtureError::PortNotFound {
                service: format!("{}/{}", self.namespace, self.name),
                port_name: port_name.to_string(),
            })?;

        match &port.target_port {
            TargetPort::Number(n) if *n != 0 => Ok(*n),
            other => Err(FixtureError::Discovery(format!(
                "port '{}' in service {}/{} targets '{}', expected a non-zero port number",
                port_name, self.namespace, self.name, other
            ))),
        }
    }
}

/// Identifies the pod a tunnel is opened to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSelectOptions {
    pub pod_namespace: String,
    pub pod_name: String,
}

/// Narrow view of the cluster API.
#[async_trait]
pub trait ClusterAccessor: Send + Sync {
    /// Pods in `namespace` matching the label `selector`.
    async fn get_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, FixtureError>;

    /// Service `name` in `namespace`.
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, FixtureError>;

    /// Build (but do not start) a tunnel from `local_port` to `remote_port`
    /// on the selected pod. A `local_port` of 0 picks an ephemeral port.
    fn new_port_forwarder(
        &self,
        options: &PodSelectOptions,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Box<dyn PortForwarder>, FixtureError>;
}

/// A port-forward tunnel.
#[async_trait]
pub trait PortForwarder: Send {
    /// Open the tunnel. Returns once it accepts connections.
    async fn start(&mut self) -> Result<(), FixtureError>;

    /// Local `host:port` of a started tunnel.
    fn address(&self) -> Result<String, FixtureError>;

    /// Tear the tunnel down. Idempotent, and safe on a tunnel that was
    /// never started.
    async fn close(&mut self) -> Result<(), FixtureError>;
}
