//! Deployment configuration and baseline manifest extraction.

use crate::config::FrameworkConfig;
use crate::errors::FixtureError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name the extracted manifest is written to inside a work directory.
pub const ATTRIBUTE_MANIFEST_FILE: &str = "attributemanifest.yaml";

/// Attribute manifest shipped with the framework.
pub const BUNDLED_ATTRIBUTE_MANIFEST: &str = include_str!("../manifests/attributemanifest.yaml");

/// Where the system components are deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    system_namespace: String,
}

impl DeploymentConfig {
    pub fn new(system_namespace: impl Into<String>) -> Self {
        Self {
            system_namespace: system_namespace.into(),
        }
    }

    pub fn from_config(config: &FrameworkConfig) -> Self {
        Self::new(config.system_namespace.clone())
    }

    /// Namespace used for in-cluster discovery.
    pub fn system_namespace(&self) -> &str {
        &self.system_namespace
    }
}

/// Produces the bootstrap document every config directory is seeded with.
#[async_trait]
pub trait ManifestExtractor: Send + Sync {
    /// Materialize the attribute manifest under `workdir` and return its
    /// contents.
    async fn extract_attribute_manifest(&self, workdir: &Path) -> Result<String, FixtureError>;
}

/// Extracts the bundled attribute manifest, or a file that replaces it.
#[derive(Debug, Clone, Default)]
pub struct BundledManifestExtractor {
    override_path: Option<PathBuf>,
}

impl BundledManifestExtractor {
    pub fn new(override_path: Option<PathBuf>) -> Self {
        Self { override_path }
    }

    pub fn from_config(config: &FrameworkConfig) -> Self {
        Self::new(config.attribute_manifest.clone())
    }
}

#[async_trait]
impl ManifestExtractor for BundledManifestExtractor {
    async fn extract_attribute_manifest(&self, workdir: &Path) -> Result<String, FixtureError> {
        let contents = match &self.override_path {
            Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                FixtureError::Manifest(format!(
                    "failed to read attribute manifest {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => BUNDLED_ATTRIBUTE_MANIFEST.to_string(),
        };

        if contents.trim().is_empty() {
            return Err(FixtureError::Manifest(
                "attribute manifest is empty".to_string(),
            ));
        }

        let target = workdir.join(ATTRIBUTE_MANIFEST_FILE);
        tokio::fs::write(&target, &contents)
            .await
            .map_err(|e| FixtureError::io(&target, e))?;

        debug!(path = %target.display(), "Extracted attribute manifest");
        Ok(contents)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bundled_manifest_written_to_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let contents = BundledManifestExtractor::default()
            .extract_attribute_manifest(dir.path())
            .await
            .unwrap();

        assert!(contents.contains("kind: attributemanifest"));
        let on_disk = std::fs::read_to_string(dir.path().join(ATTRIBUTE_MANIFEST_FILE)).unwrap();
        assert_eq!(on_disk, contents);
    }

    #[tokio::test]
    async fn test_override_replaces_bundled_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("custom.yaml");
        std::fs::write(&custom, "kind: attributemanifest\nmetadata:\n  name: custom\n").unwrap();

        let workdir = dir.path().join("work");
        std::fs::create_dir(&workdir).unwrap();

        let contents = BundledManifestExtractor::new(Some(custom))
            .extract_attribute_manifest(&workdir)
            .await
            .unwrap();
        assert!(contents.contains("name: custom"));
    }

    #[tokio::test]
    async fn test_missing_override_is_manifest_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BundledManifestExtractor::new(Some(dir.path().join("missing.yaml")))
            .extract_attribute_manifest(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::Manifest(_)));
    }

    #[test]
    fn test_deployment_config_namespace() {
        let config = FrameworkConfig {
            system_namespace: "mesh-system".to_string(),
            ..FrameworkConfig::default()
        };
        assert_eq!(
            DeploymentConfig::from_config(&config).system_namespace(),
            "mesh-system"
        );
    }
}
