//! Sample configuration documents and test configurations.

use fixture_framework::components::{DEFAULT_POD_SELECTOR, DEFAULT_PORT_NAME, DEFAULT_SERVICE_NAME};
use fixture_framework::config::DEFAULT_SYSTEM_NAMESPACE;
use fixture_framework::{FrameworkConfig, Timeouts};
use std::path::Path;
use std::time::Duration;

/// Mesh configuration most tests start from.
pub const MESH_CONFIG: &str = "\
ingressClass: fixture
defaultConfig:
  discoveryAddress: config-server.fixture-system:9901
";

/// A gateway document without namespace placeholders.
pub const GATEWAY: &str = "\
apiVersion: networking.mesh.io/v1
kind: Gateway
metadata:
  name: ingress
spec:
  selector:
    app: ingress
";

/// A virtual service whose namespace is templated.
pub const TEMPLATED_VIRTUAL_SERVICE: &str = "\
apiVersion: networking.mesh.io/v1
kind: VirtualService
metadata:
  name: reviews
  namespace: {{ .Namespace }}
spec:
  hosts:
    - reviews.{{ .Namespace }}.svc.cluster.local
";

/// The system namespace and selector the default kube target looks for.
pub const SYSTEM_NAMESPACE: &str = DEFAULT_SYSTEM_NAMESPACE;
pub const POD_SELECTOR: &str = DEFAULT_POD_SELECTOR;
pub const SERVICE_NAME: &str = DEFAULT_SERVICE_NAME;
pub const PORT_NAME: &str = DEFAULT_PORT_NAME;

/// Timeouts short enough for failure-path tests.
#[must_use]
pub fn short_timeouts() -> Timeouts {
    Timeouts {
        startup: Duration::from_secs(5),
        pod_ready: Duration::from_millis(400),
        snapshot: Duration::from_secs(10),
    }
}

/// Native framework config rooted in `work_dir` with short timeouts.
#[must_use]
pub fn test_config(work_dir: &Path) -> FrameworkConfig {
    FrameworkConfig {
        work_dir: work_dir.to_path_buf(),
        timeouts: short_timeouts(),
        ..FrameworkConfig::default()
    }
}

/// Parse a YAML document into the JSON form snapshots serve.
#[must_use]
pub fn as_resource(document: &str) -> serde_json::Value {
    let docs = config_server::snapshot::parse_documents(document).expect("document parses");
    assert_eq!(docs.len(), 1, "expected exactly one document");
    docs.into_iter().next().unwrap()
}
