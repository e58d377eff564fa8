//! Resource identity and tracking.
//!
//! Everything a test context acquires (components, child contexts) is
//! registered with the context's [`ResourceTracker`] and released at
//! teardown in reverse registration order.

use crate::errors::{collapse, FixtureError};
use async_trait::async_trait;
use common::error::ErrorList;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Opaque identifier of a tracked resource, unique within one context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    label: String,
    seq: u64,
}

impl ResourceId {
    pub(crate) fn new(label: impl Into<String>, seq: u64) -> Self {
        Self {
            label: label.into(),
            seq,
        }
    }

    /// Human-readable label given at registration.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Registration sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.seq)
    }
}

/// Something a context must release at teardown.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Identifier assigned at registration.
    fn id(&self) -> ResourceId;

    /// Release the resource. Must be idempotent.
    async fn close(&self) -> Result<(), FixtureError>;
}

#[derive(Default)]
struct Registry {
    next_seq: u64,
    resources: Vec<Arc<dyn Resource>>,
}

/// Registry of resources owned by a context.
///
/// Identifier allocation and insertion happen under one lock, so
/// identifiers are unique and registration order is well defined even when
/// components are created from concurrent tasks.
#[derive(Default)]
pub struct ResourceTracker {
    registry: Mutex<Registry>,
}

impl ResourceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource built from its freshly allocated identifier.
    pub fn track_resource<R, F>(&self, label: &str, build: F) -> Arc<R>
    where
        R: Resource + 'static,
        F: FnOnce(ResourceId) -> R,
    {
        let mut registry = self.lock();
        let id = ResourceId::new(label, registry.next_seq);
        registry.next_seq += 1;

        let resource = Arc::new(build(id.clone()));
        registry.resources.push(resource.clone());
        debug!(resource = %id, "Tracking resource");
        resource
    }

    /// Number of resources awaiting release.
    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every tracked resource, last registered first.
    ///
    /// A failing close does not stop the remaining ones; all failures are
    /// returned together. Resources are removed from the registry before
    /// closing, so each one is released at most once.
    ///
    /// # Errors
    ///
    /// Returns the single close failure, or [`FixtureError::Multiple`] when
    /// several resources failed to close.
    pub async fn release_all(&self) -> Result<(), FixtureError> {
        let resources = std::mem::take(&mut self.lock().resources);
        let mut errors = ErrorList::new();

        for resource in resources.into_iter().rev() {
            let id = resource.id();
            match resource.close().await {
                Ok(()) => debug!(resource = %id, "Released resource"),
                Err(e) => {
                    warn!(resource = %id, error = %e, "Failed to release resource");
                    errors.push(e);
                }
            }
        }

        collapse(errors)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
