//! Mock cluster accessor for kube-environment tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use fixture_test_utils::MockCluster;
//!
//! let cluster = MockCluster::builder()
//!     .with_ready_pod("fixture-system", "app=config-server", "config-server-0")
//!     .with_service_port("fixture-system", "config-server", "http-api", 80, 9901)
//!     .forward_to("127.0.0.1:41235")
//!     .build();
//! let stats = cluster.stats();
//!
//! // Build a KubeEnvironment over Arc::new(cluster)...
//! assert_eq!(stats.leaked(), 0);
//! ```

use async_trait::async_trait;
use fixture_framework::kube::{
    ClusterAccessor, Pod, PodSelectOptions, PortForwarder, Service, ServicePort, TargetPort,
};
use fixture_framework::FixtureError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Tunnel accounting shared between a [`MockCluster`] and its forwarders.
#[derive(Debug, Default)]
pub struct TunnelStats {
    created: AtomicUsize,
    started: AtomicUsize,
    closed: AtomicUsize,
    pod_fetches: AtomicUsize,
    forwarded_ports: Mutex<Vec<u16>>,
}

impl TunnelStats {
    /// Forwarders handed out.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Forwarders successfully started.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Forwarders closed (each counted once).
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Forwarders handed out but never closed.
    pub fn leaked(&self) -> usize {
        self.created() - self.closed()
    }

    /// Calls to `get_pods`.
    pub fn pod_fetches(&self) -> usize {
        self.pod_fetches.load(Ordering::SeqCst)
    }

    /// Remote ports forwarders were created for, in order.
    pub fn forwarded_ports(&self) -> Vec<u16> {
        self.forwarded_ports.lock().unwrap().clone()
    }
}

/// In-memory cluster.
pub struct MockCluster {
    pods: HashMap<(String, String), Vec<Pod>>,
    services: HashMap<(String, String), Service>,
    forward_target: String,
    ready_after_fetches: usize,
    fail_new_forwarder: bool,
    fail_tunnel_start: bool,
    fail_tunnel_close: bool,
    stats: Arc<TunnelStats>,
}

impl MockCluster {
    #[must_use]
    pub fn builder() -> MockClusterBuilder {
        MockClusterBuilder::default()
    }

    /// Accounting for this cluster's tunnels.
    #[must_use]
    pub fn stats(&self) -> Arc<TunnelStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl ClusterAccessor for MockCluster {
    async fn get_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, FixtureError> {
        let fetch = self.stats.pod_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pods = self
            .pods
            .get(&(namespace.to_string(), selector.to_string()))
            .cloned()
            .unwrap_or_default();

        if fetch <= self.ready_after_fetches {
            for pod in &mut pods {
                pod.ready = false;
                pod.phase = "Pending".to_string();
            }
        }
        Ok(pods)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, FixtureError> {
        self.services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                FixtureError::Discovery(format!("services \"{}\" not found in {}", name, namespace))
            })
    }

    fn new_port_forwarder(
        &self,
        options: &PodSelectOptions,
        _local_port: u16,
        remote_port: u16,
    ) -> Result<Box<dyn PortForwarder>, FixtureError> {
        if self.fail_new_forwarder {
            return Err(FixtureError::Tunnel(format!(
                "cannot build tunnel to pod {}",
                options.pod_name
            )));
        }

        self.stats.created.fetch_add(1, Ordering::SeqCst);
        self.stats.forwarded_ports.lock().unwrap().push(remote_port);

        Ok(Box::new(MockPortForwarder {
            target: self.forward_target.clone(),
            fail_start: self.fail_tunnel_start,
            fail_close: self.fail_tunnel_close,
            started: false,
            closed: false,
            stats: self.stats.clone(),
        }))
    }
}

/// Forwarder that "forwards" to a fixed local address.
struct MockPortForwarder {
    target: String,
    fail_start: bool,
    fail_close: bool,
    started: bool,
    closed: bool,
    stats: Arc<TunnelStats>,
}

#[async_trait]
impl PortForwarder for MockPortForwarder {
    async fn start(&mut self) -> Result<(), FixtureError> {
        if self.fail_start {
            return Err(FixtureError::Tunnel("injected tunnel start failure".to_string()));
        }
        self.started = true;
        self.stats.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn address(&self) -> Result<String, FixtureError> {
        if !self.started || self.closed {
            return Err(FixtureError::Tunnel("tunnel is not running".to_string()));
        }
        Ok(self.target.clone())
    }

    async fn close(&mut self) -> Result<(), FixtureError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(FixtureError::Tunnel("injected tunnel close failure".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`MockCluster`].
#[derive(Default)]
pub struct MockClusterBuilder {
    pods: HashMap<(String, String), Vec<Pod>>,
    services: HashMap<(String, String), Service>,
    forward_target: Option<String>,
    ready_after_fetches: usize,
    fail_new_forwarder: bool,
    fail_tunnel_start: bool,
    fail_tunnel_close: bool,
}

impl MockClusterBuilder {
    /// Add a running, ready pod matched by `selector`.
    #[must_use]
    pub fn with_ready_pod(self, namespace: &str, selector: &str, name: &str) -> Self {
        self.with_pod(
            selector,
            Pod {
                name: name.to_string(),
                namespace: namespace.to_string(),
                phase: "Running".to_string(),
                ready: true,
            },
        )
    }

    /// Add a pod matched by `selector` in the pod's namespace.
    #[must_use]
    pub fn with_pod(mut self, selector: &str, pod: Pod) -> Self {
        self.pods
            .entry((pod.namespace.clone(), selector.to_string()))
            .or_default()
            .push(pod);
        self
    }

    /// Add (or extend) a service with a numeric target port.
    #[must_use]
    pub fn with_service_port(
        mut self,
        namespace: &str,
        service: &str,
        port_name: &str,
        port: u16,
        target_port: u16,
    ) -> Self {
        self.services
            .entry((namespace.to_string(), service.to_string()))
            .or_insert_with(|| Service {
                name: service.to_string(),
                namespace: namespace.to_string(),
                ports: Vec::new(),
            })
            .ports
            .push(ServicePort {
                name: port_name.to_string(),
                port,
                target_port: TargetPort::Number(target_port),
            });
        self
    }

    /// Add a service as-is.
    #[must_use]
    pub fn with_service(mut self, service: Service) -> Self {
        self.services
            .insert((service.namespace.clone(), service.name.clone()), service);
        self
    }

    /// Address started tunnels report.
    #[must_use]
    pub fn forward_to(mut self, address: impl Into<String>) -> Self {
        self.forward_target = Some(address.into());
        self
    }

    /// Report pods as not ready for the first `fetches` lookups.
    #[must_use]
    pub fn pods_ready_after(mut self, fetches: usize) -> Self {
        self.ready_after_fetches = fetches;
        self
    }

    #[must_use]
    pub fn fail_new_forwarder(mut self) -> Self {
        self.fail_new_forwarder = true;
        self
    }

    #[must_use]
    pub fn fail_tunnel_start(mut self) -> Self {
        self.fail_tunnel_start = true;
        self
    }

    #[must_use]
    pub fn fail_tunnel_close(mut self) -> Self {
        self.fail_tunnel_close = true;
        self
    }

    #[must_use]
    pub fn build(self) -> MockCluster {
        MockCluster {
            pods: self.pods,
            services: self.services,
            forward_target: self
                .forward_target
                .unwrap_or_else(|| "127.0.0.1:1".to_string()),
            ready_after_fetches: self.ready_after_fetches,
            fail_new_forwarder: self.fail_new_forwarder,
            fail_tunnel_start: self.fail_tunnel_start,
            fail_tunnel_close: self.fail_tunnel_close,
            stats: Arc::new(TunnelStats::default()),
        }
    }
}
