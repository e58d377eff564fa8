//! Kube component lifecycle against a mock cluster.
//!
//! Tunnels "forward" to a config server started in-process, so the client
//! side of the component talks real HTTP.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use config_server::{Server, ServerArgs};
use fixture_framework::deployment::DeploymentConfig;
use fixture_framework::environment::KubeEnvironment;
use fixture_framework::kube::{Service, ServicePort, TargetPort};
use fixture_framework::{
    new_component, ComponentConfig, Context, Environment, EnvironmentKind, FixtureError, Instance,
    KubeTarget, Resource, TemplateNamespace, Timeouts,
};
use fixture_test_utils::fixtures::{
    as_resource, short_timeouts, test_config, GATEWAY, POD_SELECTOR, PORT_NAME, SERVICE_NAME,
    SYSTEM_NAMESPACE,
};
use fixture_test_utils::{MockCluster, MockClusterBuilder};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const REMOTE_PORT: u16 = 9901;

fn remote_args(config_path: &Path) -> ServerArgs {
    ServerArgs {
        insecure: true,
        disable_resource_ready_check: true,
        config_path: config_path.to_path_buf(),
        introspection_port: None,
        excluded_resource_kinds: vec![],
        api_address: "tcp://127.0.0.1:0".to_string(),
        watch_interval: Duration::from_millis(20),
        ..ServerArgs::default()
    }
}

/// Config server standing in for the one inside the cluster.
struct Remote {
    _config_dir: tempfile::TempDir,
    server: Server,
}

impl Remote {
    async fn start(args: impl FnOnce(&Path) -> ServerArgs) -> Self {
        let config_dir = tempfile::tempdir().unwrap();
        std::fs::write(config_dir.path().join("gateway.yaml"), GATEWAY).unwrap();
        let server = Server::start(args(config_dir.path())).await.unwrap();
        Self {
            _config_dir: config_dir,
            server,
        }
    }

    fn address(&self) -> String {
        self.server.address().unwrap().to_string()
    }
}

fn healthy_cluster() -> MockClusterBuilder {
    MockCluster::builder()
        .with_ready_pod(SYSTEM_NAMESPACE, POD_SELECTOR, "config-server-0")
        .with_service_port(SYSTEM_NAMESPACE, SERVICE_NAME, "grpc", 15010, 15010)
        .with_service_port(SYSTEM_NAMESPACE, SERVICE_NAME, PORT_NAME, 80, REMOTE_PORT)
}

async fn kube_context(work_dir: &Path, cluster: MockCluster, timeouts: Timeouts) -> Context {
    common::observability::init_test_tracing();

    let config = test_config(work_dir);
    let environment = KubeEnvironment::new(
        Arc::new(cluster),
        DeploymentConfig::new(SYSTEM_NAMESPACE),
        timeouts,
    );
    Context::with_environment(config, Environment::Kube(environment))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_connects_through_tunnel_to_named_port() {
    let mut remote = Remote::start(remote_args).await;
    let cluster = healthy_cluster().forward_to(remote.address()).build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;

    let instance = new_component(&ctx, ComponentConfig::default()).await.unwrap();

    assert_eq!(instance.environment(), EnvironmentKind::Kube);
    assert_eq!(instance.address().unwrap(), remote.address());
    assert_eq!(stats.forwarded_ports(), vec![REMOTE_PORT]);
    assert_eq!(stats.started(), 1);

    instance
        .wait_for_snapshot("Gateway", &[as_resource(GATEWAY)])
        .await
        .unwrap();

    ctx.teardown().await.unwrap();
    assert_eq!(stats.leaked(), 0);
    assert!(matches!(instance.address(), Err(FixtureError::Closed(_))));

    remote.server.close().await.unwrap();
}

#[tokio::test]
async fn test_access_token_reaches_remote() {
    let mut remote = Remote::start(|path| ServerArgs {
        insecure: false,
        access_token: Some("fixture-token".to_string()),
        ..remote_args(path)
    })
    .await;
    let cluster = healthy_cluster().forward_to(remote.address()).build();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;

    let config = ComponentConfig {
        kube: KubeTarget {
            access_token: Some("fixture-token".to_string()),
            ..KubeTarget::default()
        },
        ..ComponentConfig::default()
    };
    let instance = new_component(&ctx, config).await.unwrap();
    instance
        .wait_for_snapshot("Gateway", &[as_resource(GATEWAY)])
        .await
        .unwrap();

    ctx.teardown().await.unwrap();
    remote.server.close().await.unwrap();
}

#[tokio::test]
async fn test_waits_for_pod_readiness() {
    let mut remote = Remote::start(remote_args).await;
    let cluster = healthy_cluster()
        .forward_to(remote.address())
        .pods_ready_after(2)
        .build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let timeouts = Timeouts {
        pod_ready: Duration::from_secs(5),
        ..short_timeouts()
    };
    let ctx = kube_context(work_dir.path(), cluster, timeouts).await;

    new_component(&ctx, ComponentConfig::default()).await.unwrap();
    assert!(stats.pod_fetches() >= 3);

    ctx.teardown().await.unwrap();
    assert_eq!(stats.leaked(), 0);
    remote.server.close().await.unwrap();
}

#[tokio::test]
async fn test_pod_not_found_opens_no_tunnel() {
    let cluster = MockCluster::builder()
        .with_service_port(SYSTEM_NAMESPACE, SERVICE_NAME, PORT_NAME, 80, REMOTE_PORT)
        .build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;

    let err = new_component(&ctx, ComponentConfig::default())
        .await
        .err()
        .expect("connect should fail without a pod");

    assert!(err.is_timeout(), "got {}", err);
    assert!(err.to_string().contains("found 0"), "got {}", err);
    assert_eq!(stats.created(), 0);
    assert_eq!(ctx.tracked_resources(), 1);

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn test_ambiguous_selector_fails() {
    let cluster = healthy_cluster()
        .with_ready_pod(SYSTEM_NAMESPACE, POD_SELECTOR, "config-server-1")
        .build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;

    let err = new_component(&ctx, ComponentConfig::default())
        .await
        .err()
        .expect("two matching pods should fail");
    assert!(err.is_timeout());
    assert_eq!(stats.created(), 0);

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn test_missing_named_port_opens_no_tunnel() {
    let cluster = MockCluster::builder()
        .with_ready_pod(SYSTEM_NAMESPACE, POD_SELECTOR, "config-server-0")
        .with_service_port(SYSTEM_NAMESPACE, SERVICE_NAME, "grpc", 15010, 15010)
        .build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;

    let err = new_component(&ctx, ComponentConfig::default())
        .await
        .err()
        .expect("missing port should fail");

    let FixtureError::PortNotFound { service, port_name } = &err else {
        unreachable!("expected PortNotFound, got {}", err);
    };
    assert_eq!(service, &format!("{}/{}", SYSTEM_NAMESPACE, SERVICE_NAME));
    assert_eq!(port_name, PORT_NAME);
    assert_eq!(
        err.to_string(),
        format!(
            "Failed to get target port '{}' in service {}/{}",
            PORT_NAME, SYSTEM_NAMESPACE, SERVICE_NAME
        )
    );
    assert_eq!(stats.created(), 0);

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn test_missing_service_fails_discovery() {
    let cluster = MockCluster::builder()
        .with_ready_pod(SYSTEM_NAMESPACE, POD_SELECTOR, "config-server-0")
        .build();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;

    let result = new_component(&ctx, ComponentConfig::default()).await;
    assert!(matches!(result, Err(FixtureError::Discovery(_))));

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn test_named_target_port_is_rejected() {
    let cluster = MockCluster::builder()
        .with_ready_pod(SYSTEM_NAMESPACE, POD_SELECTOR, "config-server-0")
        .with_service(Service {
            name: SERVICE_NAME.to_string(),
            namespace: SYSTEM_NAMESPACE.to_string(),
            ports: vec![ServicePort {
                name: PORT_NAME.to_string(),
                port: 80,
                target_port: TargetPort::Name("http".to_string()),
            }],
        })
        .build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;

    let result = new_component(&ctx, ComponentConfig::default()).await;
    assert!(matches!(result, Err(FixtureError::Discovery(_))));
    assert_eq!(stats.created(), 0);

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn test_forwarder_construction_failure() {
    let cluster = healthy_cluster().fail_new_forwarder().build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;

    let result = new_component(&ctx, ComponentConfig::default()).await;
    assert!(matches!(result, Err(FixtureError::Tunnel(_))));
    assert_eq!(stats.created(), 0);
    assert_eq!(stats.leaked(), 0);

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn test_tunnel_start_failure_closes_tunnel() {
    let cluster = healthy_cluster().fail_tunnel_start().build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;

    let result = new_component(&ctx, ComponentConfig::default()).await;
    assert!(matches!(result, Err(FixtureError::Tunnel(_))));
    assert_eq!(stats.created(), 1);
    assert_eq!(stats.leaked(), 0);

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn test_unresponsive_remote_closes_tunnel() {
    // Nothing listens on the default forward target.
    let cluster = healthy_cluster().build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let timeouts = Timeouts {
        startup: Duration::from_millis(300),
        ..short_timeouts()
    };
    let ctx = kube_context(work_dir.path(), cluster, timeouts).await;

    let err = new_component(&ctx, ComponentConfig::default())
        .await
        .err()
        .expect("unreachable remote should fail");
    assert!(err.is_timeout(), "got {}", err);
    assert_eq!(stats.started(), 1);
    assert_eq!(stats.leaked(), 0);

    ctx.teardown().await.unwrap();
}

#[tokio::test]
async fn test_mutating_operations_are_unsupported() {
    let mut remote = Remote::start(remote_args).await;
    let cluster = healthy_cluster().forward_to(remote.address()).build();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;
    let instance = new_component(&ctx, ComponentConfig::default()).await.unwrap();

    let namespace = TemplateNamespace::new("team-a").unwrap();
    let source = tempfile::tempdir().unwrap();
    let results = [
        ("apply_config", instance.apply_config(Some(&namespace), &[GATEWAY]).await),
        ("apply_config_dir", instance.apply_config_dir(None, source.path()).await),
        ("clear_config", instance.clear_config().await),
        ("reset", instance.reset().await),
    ];
    for (name, result) in results {
        let Err(FixtureError::Unsupported {
            operation,
            environment,
            ..
        }) = result
        else {
            unreachable!("{} should be unsupported", name);
        };
        assert_eq!(operation, name);
        assert_eq!(environment, EnvironmentKind::Kube);
    }

    // The component is still usable afterwards.
    assert!(instance.address().is_ok());

    ctx.teardown().await.unwrap();
    remote.server.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_reports_tunnel_failure() {
    let mut remote = Remote::start(remote_args).await;
    let cluster = healthy_cluster()
        .forward_to(remote.address())
        .fail_tunnel_close()
        .build();
    let stats = cluster.stats();
    let work_dir = tempfile::tempdir().unwrap();
    let ctx = kube_context(work_dir.path(), cluster, short_timeouts()).await;
    let instance = new_component(&ctx, ComponentConfig::default()).await.unwrap();

    let first = instance.close().await;
    assert!(matches!(first, Err(FixtureError::Tunnel(_))));
    assert_eq!(stats.leaked(), 0);

    // Nothing left to close.
    instance.close().await.unwrap();
    instance.close().await.unwrap();
    ctx.teardown().await.unwrap();

    remote.server.close().await.unwrap();
}
