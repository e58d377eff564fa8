//! Test context: environment, resource registry and scratch directories.
//!
//! A [`Context`] is created once per test run (or per sub-test through
//! [`Context::new_child`]) and passed explicitly to everything that needs
//! to allocate directories or register resources. [`Context::teardown`]
//! releases every registered resource, last acquired first, and then
//! removes the run directory.

use crate::config::FrameworkConfig;
use crate::environment::Environment;
use crate::errors::{collapse, FixtureError};
use crate::resource::{Resource, ResourceId, ResourceTracker};
use async_trait::async_trait;
use common::error::ErrorList;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Allocates uniquely named directories under a root.
///
/// Components hold this rather than the [`Context`] that registered them,
/// so the registry never ends up owning a handle to itself.
#[derive(Debug, Clone)]
pub struct TmpDirs {
    root: Arc<PathBuf>,
    next: Arc<AtomicU64>,
}

impl TmpDirs {
    fn new(root: PathBuf) -> Self {
        Self {
            root: Arc::new(root),
            next: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory named after `label`.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Io`] if the directory cannot be created.
    pub async fn create_tmp_directory(&self, label: &str) -> Result<PathBuf, FixtureError> {
        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        let path = self.root.join(format!("{}-{}", sanitize_label(label), seq));
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| FixtureError::io(&path, e))?;
        debug!(path = %path.display(), "Created tmp directory");
        Ok(path)
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "dir".to_string()
    } else {
        cleaned
    }
}

struct ContextInner {
    id: ResourceId,
    environment: Environment,
    config: FrameworkConfig,
    tracker: ResourceTracker,
    dirs: TmpDirs,
    torn_down: AtomicBool,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if !self.tracker.is_empty() {
            warn!(
                context = %self.id,
                resources = self.tracker.len(),
                "Context dropped without teardown; resources were not released"
            );
        }
    }
}

/// Per-test-run state. Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a root context with the environment selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Io`] if the run directory cannot be created.
    pub async fn new(config: FrameworkConfig) -> Result<Self, FixtureError> {
        let environment = Environment::from_config(&config);
        Self::with_environment(config, environment).await
    }

    /// Create a root context with an explicitly built environment.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Io`] if the run directory cannot be created.
    pub async fn with_environment(
        config: FrameworkConfig,
        environment: Environment,
    ) -> Result<Self, FixtureError> {
        let root = config
            .work_dir
            .join(format!("fixture-run-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| FixtureError::io(&root, e))?;

        info!(
            environment = %environment.kind(),
            work_dir = %root.display(),
            "Test context created"
        );

        Ok(Self::from_parts(
            ResourceId::new("context", 0),
            environment,
            config,
            root,
        ))
    }

    fn from_parts(
        id: ResourceId,
        environment: Environment,
        config: FrameworkConfig,
        root: PathBuf,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                environment,
                config,
                tracker: ResourceTracker::new(),
                dirs: TmpDirs::new(root),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    /// Create a nested context for a sub-test.
    ///
    /// The child shares this context's environment, works in its own
    /// directory beneath this context's, and is itself registered here, so
    /// tearing this context down also tears the child down.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Io`] if the child's directory cannot be
    /// created.
    pub async fn new_child(&self, label: &str) -> Result<Context, FixtureError> {
        let root = self.create_tmp_directory(label).await?;
        let environment = self.inner.environment.clone();
        let config = self.inner.config.clone();

        let child = self.inner.tracker.track_resource(label, |id| {
            Context::from_parts(id, environment, config, root)
        });
        Ok(Context::clone(&child))
    }

    pub fn id(&self) -> &ResourceId {
        &self.inner.id
    }

    /// Environment active for this context's lifetime.
    pub fn environment(&self) -> &Environment {
        &self.inner.environment
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.inner.config
    }

    /// This context's working directory.
    pub fn work_dir(&self) -> &Path {
        self.inner.dirs.root()
    }

    /// Directory allocator shared with components built in this context.
    pub fn tmp_dirs(&self) -> TmpDirs {
        self.inner.dirs.clone()
    }

    /// Allocate a fresh, uniquely named directory scoped to this context.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Io`] if the directory cannot be created.
    pub async fn create_tmp_directory(&self, label: &str) -> Result<PathBuf, FixtureError> {
        self.inner.dirs.create_tmp_directory(label).await
    }

    /// Register a resource for release at teardown.
    pub fn track_resource<R, F>(&self, label: &str, build: F) -> Arc<R>
    where
        R: Resource + 'static,
        F: FnOnce(ResourceId) -> R,
    {
        self.inner.tracker.track_resource(label, build)
    }

    /// Number of resources awaiting release.
    pub fn tracked_resources(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Release every registered resource in reverse registration order, then
    /// remove the working directory unless configured to keep it.
    ///
    /// Safe to call repeatedly: each call releases whatever was registered
    /// since the previous one, and every resource is released exactly once.
    /// Release failures do not stop sibling releases or the directory
    /// cleanup.
    ///
    /// # Errors
    ///
    /// Returns every release and cleanup failure, combined.
    pub async fn teardown(&self) -> Result<(), FixtureError> {
        let repeated = self.inner.torn_down.swap(true, Ordering::SeqCst);
        if repeated && self.inner.tracker.is_empty() {
            return Ok(());
        }
        if repeated {
            warn!(
                context = %self.inner.id,
                resources = self.inner.tracker.len(),
                "Releasing resources registered after teardown"
            );
        }

        let mut errors = ErrorList::new();
        errors.push_result(self.inner.tracker.release_all().await);

        let root = self.work_dir();
        if self.inner.config.keep_work_dir {
            info!(context = %self.inner.id, work_dir = %root.display(), "Keeping work directory");
        } else {
            match tokio::fs::remove_dir_all(root).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => errors.push(FixtureError::io(root, e)),
            }
        }

        debug!(context = %self.inner.id, failures = errors.len(), "Context torn down");
        collapse(errors)
    }
}

#[async_trait]
impl Resource for Context {
    fn id(&self) -> ResourceId {
        self.inner.id.clone()
    }

    async fn close(&self) -> Result<(), FixtureError> {
        self.teardown().await
    }
}
