//! `kubectl`-backed cluster accessor.

use super::{ClusterAccessor, Pod, PodSelectOptions, PortForwarder, Service, ServicePort, TargetPort};
use crate::config::FrameworkConfig;
use crate::errors::FixtureError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// stderr lines kept for the error of a port-forward that failed to start.
const STDERR_TAIL_LINES: usize = 20;

/// How long an exited port-forward gets to flush its stderr.
const STDERR_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Runs `kubectl` subcommands, optionally against a specific kubeconfig.
#[derive(Debug, Clone)]
pub struct KubectlAccessor {
    kubectl: String,
    kubeconfig: Option<PathBuf>,
    /// Upper bound for a port-forward to report it is listening.
    forward_timeout: Duration,
}

impl KubectlAccessor {
    pub fn new(
        kubectl: impl Into<String>,
        kubeconfig: Option<PathBuf>,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            kubectl: kubectl.into(),
            kubeconfig,
            forward_timeout,
        }
    }

    pub fn from_config(config: &FrameworkConfig) -> Self {
        Self::new(
            config.kubectl.clone(),
            config.kubeconfig.clone(),
            config.timeouts.startup,
        )
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn get_json(&self, args: &[&str]) -> Result<Vec<u8>, FixtureError> {
        let output = self
            .command()
            .args(args)
            .args(["-o", "json"])
            .output()
            .await
            .map_err(|e| {
                FixtureError::Discovery(format!("failed to run {}: {}", self.kubectl, e))
            })?;

        if !output.status.success() {
            return Err(FixtureError::Discovery(format!(
                "kubectl {} failed ({}): {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl ClusterAccessor for KubectlAccessor {
    #[instrument(skip(self))]
    async fn get_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, FixtureError> {
        let stdout = self
            .get_json(&["get", "pods", "-n", namespace, "-l", selector])
            .await?;
        parse_pod_list(&stdout)
    }

    #[instrument(skip(self))]
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, FixtureError> {
        let stdout = self
            .get_json(&["get", "service", name, "-n", namespace])
            .await?;
        parse_service(&stdout)
    }

    fn new_port_forwarder(
        &self,
        options: &PodSelectOptions,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Box<dyn PortForwarder>, FixtureError> {
        if remote_port == 0 {
            return Err(FixtureError::Tunnel(format!(
                "cannot forward to port 0 on pod {}/{}",
                options.pod_namespace, options.pod_name
            )));
        }

        Ok(Box::new(KubectlPortForwarder {
            accessor: self.clone(),
            options: options.clone(),
            local_port,
            remote_port,
            child: None,
            address: None,
            stderr_tail: StderrTail::default(),
            stderr_task: None,
        }))
    }
}

/// A `kubectl port-forward` child process.
#[derive(Debug)]
pub struct KubectlPortForwarder {
    accessor: KubectlAccessor,
    options: PodSelectOptions,
    local_port: u16,
    remote_port: u16,
    child: Option<Child>,
    address: Option<String>,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl KubectlPortForwarder {
    fn port_spec(&self) -> String {
        if self.local_port == 0 {
            format!(":{}", self.remote_port)
        } else {
            format!("{}:{}", self.local_port, self.remote_port)
        }
    }
}

#[async_trait]
impl PortForwarder for KubectlPortForwarder {
    #[instrument(skip_all, fields(pod = %self.options.pod_name, remote_port = self.remote_port))]
    async fn start(&mut self) -> Result<(), FixtureError> {
        if self.child.is_some() {
            return Err(FixtureError::Tunnel("port-forward already started".to_string()));
        }

        let pod = format!("pod/{}", self.options.pod_name);
        let ports = self.port_spec();
        let mut child = self
            .accessor
            .command()
            .args([
                "port-forward",
                "-n",
                self.options.pod_namespace.as_str(),
                pod.as_str(),
                ports.as_str(),
                "--address",
                "127.0.0.1",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FixtureError::Tunnel(format!("failed to spawn kubectl: {}", e)))?;

        // Both pipes are drained for the child's whole life; a full pipe
        // blocks kubectl and stalls the tunnel.
        if let Some(stderr) = child.stderr.take() {
            self.stderr_task = Some(drain_stderr(stderr, self.stderr_tail.clone()));
        }
        let Some(stdout) = child.stdout.take() else {
            self.child = Some(child);
            return Err(FixtureError::Tunnel("kubectl stdout not captured".to_string()));
        };
        let mut lines = BufReader::new(stdout).lines();

        // The child is stored before waiting so a failed start is still
        // killed by close().
        self.child = Some(child);

        let wait_for_listener = async {
            while let Some(line) = lines.next_line().await? {
                debug!(line = %line, "kubectl port-forward");
                if let Some(port) = parse_forwarding_line(&line) {
                    return Ok(Some(port));
                }
            }
            Ok::<_, std::io::Error>(None)
        };

        let timeout = self.accessor.forward_timeout;
        let local_port = match tokio::time::timeout(timeout, wait_for_listener).await {
            Ok(Ok(Some(port))) => port,
            Ok(Ok(None)) => {
                let stderr = self.stderr_summary().await;
                return Err(FixtureError::Tunnel(format!(
                    "kubectl port-forward exited before listening: {}",
                    stderr
                )));
            }
            Ok(Err(e)) => {
                return Err(FixtureError::Tunnel(format!(
                    "failed to read kubectl output: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(FixtureError::ReadinessTimeout {
                    what: format!("port-forward to pod {}", self.options.pod_name),
                    timeout,
                    last_error: "kubectl did not report a listening address".to_string(),
                })
            }
        };

        // kubectl logs every accepted connection; keep the pipe drained.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line, "kubectl port-forward");
            }
        });

        self.address = Some(format!("127.0.0.1:{}", local_port));
        Ok(())
    }

    fn address(&self) -> Result<String, FixtureError> {
        self.address
            .clone()
            .ok_or_else(|| FixtureError::Tunnel("port-forward is not started".to_string()))
    }

    async fn close(&mut self) -> Result<(), FixtureError> {
        self.address = None;
        // Ends on its own once the child's stderr closes.
        self.stderr_task = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "kubectl port-forward already exited");
                Ok(())
            }
            _ => child.kill().await.map_err(|e| {
                FixtureError::Tunnel(format!("failed to stop kubectl port-forward: {}", e))
            }),
        }
    }
}

impl KubectlPortForwarder {
    /// Last stderr lines of an exited port-forward.
    async fn stderr_summary(&mut self) -> String {
        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_FLUSH_TIMEOUT, task).await.is_err() {
                debug!("kubectl stderr still open after exit");
            }
        }

        let tail = self.stderr_tail.lock().unwrap_or_else(PoisonError::into_inner);
        if tail.is_empty() {
            warn!("kubectl port-forward exited without output");
        }
        tail.iter().cloned().collect::<Vec<_>>().join("; ")
    }
}

/// Log every stderr line and keep the most recent ones.
fn drain_stderr(stderr: ChildStderr, tail: StderrTail) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(line = %line, "kubectl port-forward stderr");
            let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    })
}

/// Extract the local port from `Forwarding from 127.0.0.1:PORT -> REMOTE`.
fn parse_forwarding_line(line: &str) -> Option<u16> {
    let rest = line.trim().strip_prefix("Forwarding from ")?;
    let (local, _remote) = rest.split_once(" -> ")?;
    let (_host, port) = local.rsplit_once(':')?;
    port.parse().ok()
}

#[derive(Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Deserialize)]
struct PodItem {
    metadata: ObjectMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize, Default)]
struct PodStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    conditions: Vec<PodCondition>,
}

#[derive(Deserialize)]
struct PodCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Deserialize)]
struct ServiceItem {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Deserialize, Default)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<ServicePortItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePortItem {
    #[serde(default)]
    name: String,
    port: u16,
    #[serde(default)]
    target_port: Option<serde_json::Value>,
}

fn parse_pod_list(json: &[u8]) -> Result<Vec<Pod>, FixtureError> {
    let list: PodList = serde_json::from_slice(json)
        .map_err(|e| FixtureError::Discovery(format!("invalid pod list: {}", e)))?;

    Ok(list
        .items
        .into_iter()
        .map(|item| Pod {
            ready: item
                .status
                .conditions
                .iter()
                .any(|c| c.kind == "Ready" && c.status == "True"),
            name: item.metadata.name,
            namespace: item.metadata.namespace,
            phase: item.status.phase,
        })
        .collect())
}

fn parse_service(json: &[u8]) -> Result<Service, FixtureError> {
    let item: ServiceItem = serde_json::from_slice(json)
        .map_err(|e| FixtureError::Discovery(format!("invalid service: {}", e)))?;

    let ports = item
        .spec
        .ports
        .into_iter()
        .map(|p| {
            // An unset targetPort defaults to the service port.
            let target_port = match p.target_port {
                None => TargetPort::Number(p.port),
                Some(serde_json::Value::String(name)) => TargetPort::Name(name),
                Some(value) => value
                    .as_u64()
                    .and_then(|n| u16::try_from(n).ok())
                    .map(TargetPort::Number)
                    .ok_or_else(|| {
                        FixtureError::Discovery(format!(
                            "port '{}' has invalid targetPort {}",
                            p.name, value
                        ))
                    })?,
            };
            Ok(ServicePort {
                name: p.name,
                port: p.port,
                target_port,
            })
        })
        .collect::<Result<Vec<_>, FixtureError>>()?;

    Ok(Service {
        name: item.metadata.name,
        namespace: item.metadata.namespace,
        ports,
    })
}
