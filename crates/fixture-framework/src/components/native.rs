//! Native component: an embedded config server over a scratch config tree.
//!
//! Layout of one generation's working directory:
//!
//! ```text
//! <workdir>/
//!   attributemanifest.yaml    extracted baseline
//!   config/                   served by the config server
//!     attributemanifest.yaml  baseline seed
//!     cfg-<nanos>-<seq>.yaml  one per applied document
//!   mesh-config/
//!     meshconfig.yaml
//! ```

use super::{Client, ComponentConfig, Instance};
use crate::context::TmpDirs;
use crate::deployment::ATTRIBUTE_MANIFEST_FILE;
use crate::environment::native::dialable_address;
use crate::environment::{EnvironmentKind, NativeEnvironment, ServerHandle};
use crate::errors::{collapse, FixtureError};
use crate::namespace::Namespace;
use crate::resource::{Resource, ResourceId};
use async_trait::async_trait;
use chrono::Utc;
use common::error::ErrorList;
use config_server::ServerArgs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// Label native components are registered under.
pub const NATIVE_COMPONENT_LABEL: &str = "native-component";

/// Config sub-directory of a working directory.
pub const CONFIG_DIR: &str = "config";

/// Mesh config sub-directory of a working directory.
pub const MESH_CONFIG_DIR: &str = "mesh-config";

/// Mesh config file name inside [`MESH_CONFIG_DIR`].
pub const MESH_CONFIG_FILE: &str = "meshconfig.yaml";

/// Ephemeral port on all interfaces.
const EPHEMERAL_API_ADDRESS: &str = "tcp://0.0.0.0:0";

#[derive(Default)]
struct NativeState {
    server: Option<Box<dyn ServerHandle>>,
    client: Option<Arc<Client>>,
    config_dir: Option<PathBuf>,
    baseline: Option<String>,
    generation: u64,
}

/// Component backed by an in-process config server.
pub struct NativeComponent {
    id: ResourceId,
    config: ComponentConfig,
    environment: NativeEnvironment,
    dirs: TmpDirs,
    state: Mutex<NativeState>,
    address: RwLock<Option<String>>,
    file_seq: AtomicU64,
}

impl NativeComponent {
    /// An uninitialized component; [`Instance::reset`] brings it up.
    pub fn new(
        id: ResourceId,
        config: ComponentConfig,
        environment: NativeEnvironment,
        dirs: TmpDirs,
    ) -> Self {
        Self {
            id,
            config,
            environment,
            dirs,
            state: Mutex::new(NativeState::default()),
            address: RwLock::new(None),
            file_seq: AtomicU64::new(0),
        }
    }

    /// Live config directory, if running.
    pub async fn config_dir(&self) -> Option<PathBuf> {
        self.state.lock().await.config_dir.clone()
    }

    /// Client of the current generation, if running.
    pub async fn client(&self) -> Option<Arc<Client>> {
        self.state.lock().await.client.clone()
    }

    fn set_address(&self, address: Option<String>) {
        *self.address.write().unwrap_or_else(PoisonError::into_inner) = address;
    }

    fn live_config_dir(&self, state: &NativeState) -> Result<PathBuf, FixtureError> {
        state
            .config_dir
            .clone()
            .ok_or_else(|| FixtureError::Closed(self.id.clone()))
    }

    fn next_config_file(&self, config_dir: &Path) -> PathBuf {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.file_seq.fetch_add(1, Ordering::SeqCst);
        config_dir.join(format!("cfg-{}-{}.yaml", nanos, seq))
    }

    /// Close the current generation's client and server, in that order.
    async fn close_locked(&self, state: &mut NativeState) -> Result<(), FixtureError> {
        self.set_address(None);
        state.config_dir = None;
        state.baseline = None;

        let mut errors = ErrorList::new();
        if let Some(client) = state.client.take() {
            errors.push_result(client.close().await);
        }
        if let Some(mut server) = state.server.take() {
            errors.push_result(server.close().await);
        }
        collapse(errors)
    }

    async fn start_generation(&self, state: &mut NativeState) -> Result<String, FixtureError> {
        let workdir = self.dirs.create_tmp_directory(self.id.label()).await?;

        let config_dir = workdir.join(CONFIG_DIR);
        let mesh_dir = workdir.join(MESH_CONFIG_DIR);
        for dir in [&config_dir, &mesh_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| FixtureError::io(dir, e))?;
        }

        let mesh_file = mesh_dir.join(MESH_CONFIG_FILE);
        write_file(&mesh_file, &self.config.mesh_config).await?;

        let baseline = self
            .environment
            .manifest_extractor()
            .extract_attribute_manifest(&workdir)
            .await?;
        write_file(&config_dir.join(ATTRIBUTE_MANIFEST_FILE), &baseline).await?;
        state.baseline = Some(baseline);

        let args = ServerArgs {
            insecure: true,
            enable_server: true,
            disable_resource_ready_check: true,
            config_path: config_dir.clone(),
            mesh_config_file: mesh_file,
            introspection_port: Some(0),
            excluded_resource_kinds: Vec::new(),
            api_address: EPHEMERAL_API_ADDRESS.to_string(),
            access_token: None,
            ..ServerArgs::default()
        };
        let server = self.environment.start_server(args).await?;
        let bound = server.address();
        // Owned by the state from here on so close() reaches it on failure.
        state.server = Some(server);

        let address = bound
            .map(|addr| dialable_address(addr).to_string())
            .ok_or_else(|| FixtureError::Client("config server is not serving an API".to_string()))?;

        let client = Arc::new(Client::new(
            self.id.clone(),
            &address,
            self.environment.timeouts(),
        )?);
        state.client = Some(client.clone());
        client.wait_for_startup().await?;

        state.config_dir = Some(config_dir);
        Ok(address)
    }
}

#[async_trait]
impl Resource for NativeComponent {
    fn id(&self) -> ResourceId {
        self.id.clone()
    }

    #[instrument(skip_all, fields(resource = %self.id))]
    async fn close(&self) -> Result<(), FixtureError> {
        let mut state = self.state.lock().await;
        let result = self.close_locked(&mut state).await;
        debug!(ok = result.is_ok(), "Native component closed");
        result
    }
}

#[async_trait]
impl Instance for NativeComponent {
    fn environment(&self) -> EnvironmentKind {
        EnvironmentKind::Native
    }

    fn address(&self) -> Result<String, FixtureError> {
        self.address
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| FixtureError::Closed(self.id.clone()))
    }

    #[instrument(skip_all, fields(resource = %self.id, documents = documents.len()))]
    async fn apply_config(
        &self,
        namespace: Option<&dyn Namespace>,
        documents: &[&str],
    ) -> Result<(), FixtureError> {
        let state = self.state.lock().await;
        let config_dir = self.live_config_dir(&state)?;

        for document in documents {
            let contents = match namespace {
                Some(ns) => ns.apply(document)?,
                None => (*document).to_string(),
            };
            let path = self.next_config_file(&config_dir);
            write_file(&path, &contents).await?;
            debug!(path = %path.display(), "Applied config document");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(resource = %self.id, source = %source_dir.display()))]
    async fn apply_config_dir(
        &self,
        namespace: Option<&dyn Namespace>,
        source_dir: &Path,
    ) -> Result<(), FixtureError> {
        let state = self.state.lock().await;
        let config_dir = self.live_config_dir(&state)?;

        let root = source_dir.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || list_source_tree(&root))
            .await
            .map_err(|e| FixtureError::io(source_dir, std::io::Error::other(e)))??;

        for entry in entries {
            let source = source_dir.join(&entry.relative);
            let target = config_dir.join(&entry.relative);

            if entry.is_dir {
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| FixtureError::io(&target, e))?;
                continue;
            }

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| FixtureError::io(parent, e))?;
            }

            match namespace {
                Some(ns) => {
                    let contents = tokio::fs::read_to_string(&source)
                        .await
                        .map_err(|e| FixtureError::io(&source, e))?;
                    write_file(&target, &ns.apply(&contents)?).await?;
                }
                None => {
                    tokio::fs::copy(&source, &target)
                        .await
                        .map_err(|e| FixtureError::io(&target, e))?;
                }
            }
            debug!(path = %target.display(), "Mirrored config file");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(resource = %self.id))]
    async fn clear_config(&self) -> Result<(), FixtureError> {
        let state = self.state.lock().await;
        let config_dir = self.live_config_dir(&state)?;
        let baseline = state
            .baseline
            .clone()
            .ok_or_else(|| FixtureError::Closed(self.id.clone()))?;

        let mut entries = tokio::fs::read_dir(&config_dir)
            .await
            .map_err(|e| FixtureError::io(&config_dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FixtureError::io(&config_dir, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| FixtureError::io(&path, e))?;
            let removed = if file_type.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            removed.map_err(|e| FixtureError::io(&path, e))?;
        }

        write_file(&config_dir.join(ATTRIBUTE_MANIFEST_FILE), &baseline).await?;
        debug!("Config cleared to baseline");
        Ok(())
    }

    async fn wait_for_snapshot(
        &self,
        collection: &str,
        expected: &[serde_json::Value],
    ) -> Result<(), FixtureError> {
        // Released before waiting so config can be applied concurrently.
        let client = self
            .state
            .lock()
            .await
            .client
            .clone()
            .ok_or_else(|| FixtureError::Closed(self.id.clone()))?;
        client.wait_for_snapshot(collection, expected).await
    }

    #[instrument(skip_all, fields(resource = %self.id))]
    async fn reset(&self) -> Result<(), FixtureError> {
        let mut state = self.state.lock().await;
        self.close_locked(&mut state).await?;

        state.generation += 1;
        let generation = state.generation;

        let address = self.start_generation(&mut state).await?;
        self.set_address(Some(address.clone()));

        info!(generation, address = %address, "Native component ready");
        Ok(())
    }
}

async fn write_file(path: &Path, contents: &str) -> Result<(), FixtureError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| FixtureError::io(path, e))
}

/// One entry of a source tree, relative to its root.
#[derive(Debug, PartialEq, Eq)]
struct SourceEntry {
    relative: PathBuf,
    is_dir: bool,
}

/// Walk `root` depth-first in file-name order. Blocking; run it off the
/// runtime.
fn list_source_tree(root: &Path) -> Result<Vec<SourceEntry>, FixtureError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            FixtureError::io(path, std::io::Error::from(e))
        })?;
        let relative = entry.path().strip_prefix(root).map_err(|_| {
            FixtureError::io(
                entry.path(),
                std::io::Error::other("entry outside source directory"),
            )
        })?;
        entries.push(SourceEntry {
            relative: relative.to_path_buf(),
            is_dir: entry.file_type().is_dir(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_list_source_tree_is_relative_and_ordered() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("a/b")).unwrap();
        std::fs::write(root.path().join("a/x.yaml"), "kind: X\n").unwrap();
        std::fs::write(root.path().join("a/b/y.yaml"), "kind: Y\n").unwrap();

        let entries = list_source_tree(root.path()).unwrap();
        let expected = [("a", true), ("a/b", true), ("a/b/y.yaml", false), ("a/x.yaml", false)]
            .into_iter()
            .map(|(p, is_dir)| SourceEntry {
                relative: PathBuf::from(p),
                is_dir,
            })
            .collect::<Vec<_>>();
        assert_eq!(entries, expected);
    }

    #[test]
    fn test_list_source_tree_missing_root_is_io_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("absent");

        let err = list_source_tree(&missing).unwrap_err();
        assert!(matches!(err, FixtureError::Io { .. }), "unexpected error: {err}");
    }
}
