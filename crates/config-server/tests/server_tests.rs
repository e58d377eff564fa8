//! End-to-end tests for the config server over real HTTP.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use config_server::handlers::{DebugVars, HealthResponse};
use config_server::{Server, ServerArgs, SnapshotResponse};
use std::path::Path;
use std::time::Duration;

fn fixture_args(config_path: &Path) -> ServerArgs {
    ServerArgs {
        insecure: true,
        disable_resource_ready_check: true,
        config_path: config_path.to_path_buf(),
        introspection_port: Some(0),
        excluded_resource_kinds: vec![],
        api_address: "tcp://127.0.0.1:0".to_string(),
        watch_interval: Duration::from_millis(20),
        ..ServerArgs::default()
    }
}

async fn snapshot(base: &str, collection: &str) -> SnapshotResponse {
    reqwest::get(format!("{}/v1/snapshots?collection={}", base, collection))
        .await
        .expect("snapshot request should succeed")
        .json()
        .await
        .expect("snapshot body should be JSON")
}

#[tokio::test]
async fn test_health_reports_ready() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = Server::start(fixture_args(dir.path())).await.unwrap();
    let base = format!("http://{}", server.address().unwrap());

    let response = reqwest::get(format!("{}/v1/health", base)).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: HealthResponse = response.json().await.unwrap();
    assert_eq!(body.status, "ready");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_snapshot_follows_directory_changes() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = Server::start(fixture_args(dir.path())).await.unwrap();
    let base = format!("http://{}", server.address().unwrap());

    assert!(snapshot(&base, "Gateway").await.resources.is_empty());

    std::fs::write(
        dir.path().join("gw.yaml"),
        "kind: Gateway\nmetadata:\n  name: ingress\n",
    )
    .unwrap();

    let mut seen = None;
    for _ in 0..250 {
        let current = snapshot(&base, "Gateway").await;
        if !current.resources.is_empty() {
            seen = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let seen = seen.expect("watcher should publish the new file");
    assert_eq!(seen.resources[0]["metadata"]["name"], "ingress");

    std::fs::remove_file(dir.path().join("gw.yaml")).unwrap();
    let mut cleared = false;
    for _ in 0..250 {
        if snapshot(&base, "Gateway").await.resources.is_empty() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cleared, "removed file should disappear from the snapshot");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_ready_check_gates_health_until_scan() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("not-yet");
    let args = ServerArgs {
        disable_resource_ready_check: false,
        ..fixture_args(&missing)
    };
    let mut server = Server::start(args).await.unwrap();
    let base = format!("http://{}", server.address().unwrap());

    let response = reqwest::get(format!("{}/v1/health", base)).await.unwrap();
    assert_eq!(response.status(), 503);

    std::fs::create_dir_all(&missing).unwrap();
    let mut ready = false;
    for _ in 0..250 {
        let response = reqwest::get(format!("{}/v1/health", base)).await.unwrap();
        if response.status() == 200 {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(ready, "server should become ready once the directory exists");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_mesh_config_and_introspection() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    let mesh_file = dir.path().join("meshconfig.yaml");
    std::fs::write(&mesh_file, "ingressClass: istio\n").unwrap();

    let args = ServerArgs {
        mesh_config_file: mesh_file,
        ..fixture_args(&config_dir)
    };
    let mut server = Server::start(args).await.unwrap();

    let mesh: serde_json::Value =
        reqwest::get(format!("http://{}/v1/meshconfig", server.address().unwrap()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(mesh["ingressClass"], "istio");

    let introspection = server.introspection_address().unwrap();
    assert_ne!(introspection.port(), 0);
    let vars: DebugVars = reqwest::get(format!("http://{}/debug/vars", introspection))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(vars.insecure);
    assert!(vars.ready);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_secure_server_requires_bearer_token() {
    let dir = tempfile::tempdir().unwrap();
    let args = ServerArgs {
        insecure: false,
        access_token: Some("fixture-token".to_string()),
        ..fixture_args(dir.path())
    };
    let mut server = Server::start(args).await.unwrap();
    let url = format!(
        "http://{}/v1/snapshots?collection=Foo",
        server.address().unwrap()
    );
    let client = reqwest::Client::new();

    let denied = client.get(&url).send().await.unwrap();
    assert_eq!(denied.status(), 401);

    let allowed = client
        .get(&url)
        .bearer_auth("fixture-token")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_server_stops_accepting_connections() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = Server::start(fixture_args(dir.path())).await.unwrap();
    let addr = server.address().unwrap();

    server.close().await.unwrap();

    let result = tokio::net::TcpStream::connect(addr).await;
    assert!(result.is_err(), "listener should be gone after close");
}
