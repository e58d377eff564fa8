//! Config directory scanning and snapshot storage.
//!
//! Every `.yaml`/`.yml` file under the config path is parsed as a stream of
//! YAML documents. Each document with a `kind` lands in the collection named
//! by that kind. The store keeps the latest scan plus a version that only
//! moves when the scanned content actually changes.

use crate::errors::ServerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Resources grouped by collection name.
pub type Collections = BTreeMap<String, Vec<serde_json::Value>>;

/// Snapshot of one collection as served by `GET /v1/snapshots`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub collection: String,
    pub version: u64,
    pub resources: Vec<serde_json::Value>,
}

#[derive(Debug, Default)]
struct StoreInner {
    version: u64,
    ready: bool,
    collections: Collections,
}

/// Latest scanned state, shared between the watcher and the HTTP handlers.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    inner: RwLock<StoreInner>,
}

impl SnapshotStore {
    /// Create an empty, not-yet-ready store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored collections with a fresh scan.
    ///
    /// Returns true if the content differed from the previous scan, in which
    /// case the version was bumped. The store is ready after the first update.
    pub fn update(&self, collections: Collections) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.ready = true;
        if inner.version > 0 && inner.collections == collections {
            return false;
        }
        inner.collections = collections;
        inner.version += 1;
        true
    }

    /// Mark ready without a scan (resource ready check disabled).
    pub fn mark_ready(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .ready = true;
    }

    /// True once the first scan finished or readiness was forced.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ready
    }

    /// Current snapshot version. Zero before the first scan.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    /// Snapshot of a single collection. Unknown collections are empty.
    #[must_use]
    pub fn snapshot(&self, collection: &str) -> SnapshotResponse {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        SnapshotResponse {
            collection: collection.to_string(),
            version: inner.version,
            resources: inner
                .collections
                .get(collection)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Number of resources per collection.
    #[must_use]
    pub fn collection_counts(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .collections
            .iter()
            .map(|(name, resources)| (name.clone(), resources.len()))
            .collect()
    }
}

/// Scan `root` recursively into collections, skipping `excluded` kinds.
///
/// Files that fail to parse are logged and skipped so one bad document does
/// not hide the rest of the directory.
///
/// # Errors
///
/// Returns [`ServerError::Scan`] if the directory itself cannot be walked.
pub fn scan_directory(root: &Path, excluded: &[String]) -> Result<Collections, ServerError> {
    let scan_error = |message: String| ServerError::Scan {
        path: root.display().to_string(),
        message,
    };

    if !root.is_dir() {
        return Err(scan_error("not a directory".to_string()));
    }

    let mut collections = Collections::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| scan_error(e.to_string()))?;
        if !entry.file_type().is_file() || !is_yaml(entry.path()) {
            continue;
        }

        let text = match std::fs::read_to_string(entry.path()) {
            Ok(text) => text,
            Err(e) => {
                // Files may disappear between listing and reading
                debug!(
                    target: "config_server.snapshot",
                    path = %entry.path().display(),
                    error = %e,
                    "Skipping unreadable config file"
                );
                continue;
            }
        };

        match parse_documents(&text) {
            Ok(documents) => {
                for document in documents {
                    let Some(kind) = document.get("kind").and_then(|k| k.as_str()) else {
                        debug!(
                            target: "config_server.snapshot",
                            path = %entry.path().display(),
                            "Skipping document without kind"
                        );
                        continue;
                    };
                    if excluded.iter().any(|k| k == kind) {
                        continue;
                    }
                    collections
                        .entry(kind.to_string())
                        .or_default()
                        .push(document);
                }
            }
            Err(e) => {
                warn!(
                    target: "config_server.snapshot",
                    path = %entry.path().display(),
                    error = %e,
                    "Skipping unparseable config file"
                );
            }
        }
    }

    Ok(collections)
}

/// Parse a multi-document YAML stream, dropping empty documents.
///
/// # Errors
///
/// Returns the YAML error of the first malformed document.
pub fn parse_documents(text: &str) -> Result<Vec<serde_json::Value>, serde_yaml::Error> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_json::Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_multi_document_stream() {
        let docs = parse_documents("kind: A\n---\n---\nkind: B\nspec:\n  x: 1\n").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["kind"], "A");
        assert_eq!(docs[1]["spec"]["x"], 1);
    }

    #[test]
    fn test_scan_groups_by_kind_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "kind: Foo\nmetadata:\n  name: one\n").unwrap();
        std::fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        std::fs::write(
            dir.path().join("nested/deeper/b.yml"),
            "kind: Foo\nmetadata:\n  name: two\n---\nkind: Bar\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "kind: Foo\n").unwrap();

        let collections = scan_directory(dir.path(), &[]).unwrap();
        assert_eq!(collections["Foo"].len(), 2);
        assert_eq!(collections["Bar"].len(), 1);
    }

    #[test]
    fn test_scan_skips_excluded_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.yaml"), "kind: Secret\n").unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "kind: [unterminated\n").unwrap();
        std::fs::write(dir.path().join("nokind.yaml"), "metadata: {}\n").unwrap();
        std::fs::write(dir.path().join("ok.yaml"), "kind: Gateway\n").unwrap();

        let collections = scan_directory(dir.path(), &["Secret".to_string()]).unwrap();
        assert_eq!(collections.len(), 1);
        assert!(collections.contains_key("Gateway"));
    }

    #[test]
    fn test_scan_missing_directory_errors() {
        let err = scan_directory(Path::new("/no/such/config/dir"), &[]).unwrap_err();
        assert!(matches!(err, ServerError::Scan { .. }));
    }

    #[test]
    fn test_store_versions_only_move_on_change() {
        let store = SnapshotStore::new();
        assert!(!store.is_ready());
        assert_eq!(store.version(), 0);

        let mut collections = Collections::new();
        collections.insert("Foo".to_string(), vec![json!({"kind": "Foo"})]);

        assert!(store.update(collections.clone()));
        assert!(store.is_ready());
        assert_eq!(store.version(), 1);

        assert!(!store.update(collections.clone()));
        assert_eq!(store.version(), 1);

        collections.insert("Bar".to_string(), vec![json!({"kind": "Bar"})]);
        assert!(store.update(collections));
        assert_eq!(store.version(), 2);
        assert_eq!(store.collection_counts()["Bar"], 1);
    }

    #[test]
    fn test_first_empty_scan_still_bumps_version() {
        let store = SnapshotStore::new();
        assert!(store.update(Collections::new()));
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_unknown_collection_is_empty() {
        let store = SnapshotStore::new();
        store.mark_ready();
        let snapshot = store.snapshot("Nothing");
        assert_eq!(snapshot.collection, "Nothing");
        assert!(snapshot.resources.is_empty());
        assert!(store.is_ready());
    }
}
