//! Fixture framework configuration.
//!
//! Loaded from `FIXTURE_*` environment variables with sensible defaults so a
//! bare `cargo test` runs in the native environment.

use crate::environment::EnvironmentKind;
use common::config::parse_bool;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default namespace the system components are deployed into.
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "fixture-system";

/// Default upper bound for a backing server to answer its first request.
pub const DEFAULT_STARTUP_TIMEOUT_SECONDS: u64 = 30;

/// Default upper bound for a pod to become ready.
pub const DEFAULT_POD_READY_TIMEOUT_SECONDS: u64 = 120;

/// Default upper bound for an expected snapshot to appear.
pub const DEFAULT_SNAPSHOT_TIMEOUT_SECONDS: u64 = 30;

/// Maximum accepted value for any timeout, in seconds.
pub const MAX_TIMEOUT_SECONDS: u64 = 3600;

/// Default kubectl binary.
pub const DEFAULT_KUBECTL: &str = "kubectl";

/// Upper bounds for the framework's blocking waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Backing server / remote service answering its first request.
    pub startup: Duration,
    /// Target pod reaching ready state.
    pub pod_ready: Duration,
    /// Expected config snapshot appearing.
    pub snapshot: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECONDS),
            pod_ready: Duration::from_secs(DEFAULT_POD_READY_TIMEOUT_SECONDS),
            snapshot: Duration::from_secs(DEFAULT_SNAPSHOT_TIMEOUT_SECONDS),
        }
    }
}

/// Fixture framework configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkConfig {
    /// Which environment components are created in.
    pub environment: EnvironmentKind,

    /// Parent directory for the per-run working directory.
    pub work_dir: PathBuf,

    /// Keep the run directory after teardown for post-mortem inspection.
    pub keep_work_dir: bool,

    /// Namespace the system components run in (kube environment).
    pub system_namespace: String,

    /// Bounded wait limits.
    pub timeouts: Timeouts,

    /// kubectl binary used by the cluster accessor.
    pub kubectl: String,

    /// Optional kubeconfig passed to kubectl.
    pub kubeconfig: Option<PathBuf>,

    /// Optional file overriding the bundled attribute manifest.
    pub attribute_manifest: Option<PathBuf>,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            environment: EnvironmentKind::Native,
            work_dir: env::temp_dir(),
            keep_work_dir: false,
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
            timeouts: Timeouts::default(),
            kubectl: DEFAULT_KUBECTL.to_string(),
            kubeconfig: None,
            attribute_manifest: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment '{0}' (expected 'native' or 'kube')")]
    InvalidEnvironment(String),

    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeout(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Common(#[from] common::config::ConfigError),
}

impl FrameworkConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let environment = match vars.get("FIXTURE_ENVIRONMENT") {
            Some(value) => value
                .parse::<EnvironmentKind>()
                .map_err(|_| ConfigError::InvalidEnvironment(value.clone()))?,
            None => defaults.environment,
        };

        let work_dir = vars
            .get("FIXTURE_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);

        let keep_work_dir = match vars.get("FIXTURE_KEEP_WORKDIR") {
            Some(value) => parse_bool("FIXTURE_KEEP_WORKDIR", value)?,
            None => false,
        };

        let system_namespace = vars
            .get("FIXTURE_SYSTEM_NAMESPACE")
            .cloned()
            .unwrap_or(defaults.system_namespace);
        if system_namespace.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "FIXTURE_SYSTEM_NAMESPACE must not be empty".to_string(),
            ));
        }

        let timeouts = Timeouts {
            startup: parse_timeout(
                vars,
                "FIXTURE_STARTUP_TIMEOUT_SECONDS",
                DEFAULT_STARTUP_TIMEOUT_SECONDS,
            )?,
            pod_ready: parse_timeout(
                vars,
                "FIXTURE_POD_READY_TIMEOUT_SECONDS",
                DEFAULT_POD_READY_TIMEOUT_SECONDS,
            )?,
            snapshot: parse_timeout(
                vars,
                "FIXTURE_SNAPSHOT_TIMEOUT_SECONDS",
                DEFAULT_SNAPSHOT_TIMEOUT_SECONDS,
            )?,
        };

        let kubectl = vars
            .get("FIXTURE_KUBECTL")
            .cloned()
            .unwrap_or(defaults.kubectl);

        let kubeconfig = vars.get("FIXTURE_KUBECONFIG").map(PathBuf::from);
        let attribute_manifest = vars.get("FIXTURE_ATTRIBUTE_MANIFEST").map(PathBuf::from);

        Ok(Self {
            environment,
            work_dir,
            keep_work_dir,
            system_namespace,
            timeouts,
            kubectl,
            kubeconfig,
            attribute_manifest,
        })
    }
}

fn parse_timeout(
    vars: &HashMap<String, String>,
    name: &str,
    default_seconds: u64,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_secs(default_seconds));
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidTimeout(format!(
            "{} must be a valid integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 || value > MAX_TIMEOUT_SECONDS {
        return Err(ConfigError::InvalidTimeout(format!(
            "{} must be between 1 and {} seconds, got {}",
            name, MAX_TIMEOUT_SECONDS, value
        )));
    }

    Ok(Duration::from_secs(value))
}
