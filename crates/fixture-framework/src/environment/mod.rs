//! Execution environments.
//!
//! A [`Context`](crate::Context) runs in exactly one environment for its
//! whole lifetime. The environment carries the mode-specific collaborators
//! components are built from: a server launcher and manifest extractor in
//! native mode, a cluster accessor and deployment config in kube mode.

pub mod kube;
pub mod native;

pub use kube::{KubeEnvironment, PodFetch, SinglePodFetch};
pub use native::{EmbeddedServerLauncher, NativeEnvironment, ServerHandle, ServerLauncher};

use crate::config::FrameworkConfig;
use std::fmt;
use std::str::FromStr;

/// Which environment is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentKind {
    /// Components run in-process.
    Native,
    /// Components run in a Kubernetes cluster and are reached by tunnel.
    Kube,
}

impl EnvironmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentKind::Native => "native",
            EnvironmentKind::Kube => "kube",
        }
    }
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(EnvironmentKind::Native),
            "kube" | "kubernetes" => Ok(EnvironmentKind::Kube),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// The active environment and its collaborators.
#[derive(Clone)]
pub enum Environment {
    Native(NativeEnvironment),
    Kube(KubeEnvironment),
}

impl Environment {
    /// Build the environment selected by `config`, wired to the real
    /// collaborators (embedded config server, `kubectl`).
    pub fn from_config(config: &FrameworkConfig) -> Self {
        match config.environment {
            EnvironmentKind::Native => Environment::Native(NativeEnvironment::from_config(config)),
            EnvironmentKind::Kube => Environment::Kube(KubeEnvironment::from_config(config)),
        }
    }

    pub fn kind(&self) -> EnvironmentKind {
        match self {
            Environment::Native(_) => EnvironmentKind::Native,
            Environment::Kube(_) => EnvironmentKind::Kube,
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Environment").field(&self.kind()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_display() {
        for kind in [EnvironmentKind::Native, EnvironmentKind::Kube] {
            assert_eq!(kind.to_string().parse::<EnvironmentKind>().unwrap(), kind);
        }
        assert_eq!(" KUBE ".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::Kube);
        assert!("docker".parse::<EnvironmentKind>().is_err());
    }

    #[test]
    fn test_from_config_selects_variant() {
        let native = Environment::from_config(&FrameworkConfig::default());
        assert_eq!(native.kind(), EnvironmentKind::Native);

        let kube = Environment::from_config(&FrameworkConfig {
            environment: EnvironmentKind::Kube,
            ..FrameworkConfig::default()
        });
        assert_eq!(kube.kind(), EnvironmentKind::Kube);
        assert!(matches!(kube, Environment::Kube(_)));
    }
}
