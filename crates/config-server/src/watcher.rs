//! Config directory watcher background task.
//!
//! Periodically rescans the config directory and publishes the result to the
//! snapshot store. Polling keeps the watcher portable and is fast enough for
//! fixture-sized directories.
//!
//! # Graceful Shutdown
//!
//! The task exits when its cancellation token is triggered.

use crate::snapshot::{scan_directory, SnapshotStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Run one scan and publish it. Returns true if the snapshot changed.
pub async fn scan_once(
    store: &SnapshotStore,
    config_path: PathBuf,
    excluded: Vec<String>,
) -> bool {
    let path_for_log = config_path.display().to_string();
    let result =
        tokio::task::spawn_blocking(move || scan_directory(&config_path, &excluded)).await;

    match result {
        Ok(Ok(collections)) => {
            let changed = store.update(collections);
            if changed {
                debug!(
                    target: "config_server.watcher",
                    path = %path_for_log,
                    version = store.version(),
                    "Config snapshot updated"
                );
            }
            changed
        }
        Ok(Err(e)) => {
            // Directory may be mid-rewrite by a test; next tick retries
            warn!(target: "config_server.watcher", error = %e, "Config scan failed");
            false
        }
        Err(e) => {
            warn!(target: "config_server.watcher", error = %e, "Config scan task panicked");
            false
        }
    }
}

/// Start the config watcher loop.
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "config_server.task.watcher")]
pub async fn start_config_watcher(
    store: Arc<SnapshotStore>,
    config_path: PathBuf,
    excluded: Vec<String>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "config_server.watcher",
        path = %config_path.display(),
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "Starting config watcher task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scan_once(&store, config_path.clone(), excluded.clone()).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "config_server.watcher",
                    "Config watcher received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "config_server.watcher", "Config watcher task stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_once_publishes_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new();

        assert!(scan_once(&store, dir.path().to_path_buf(), vec![]).await);
        assert_eq!(store.version(), 1);

        std::fs::write(dir.path().join("cfg.yaml"), "kind: Foo\n").unwrap();
        assert!(scan_once(&store, dir.path().to_path_buf(), vec![]).await);
        assert_eq!(store.snapshot("Foo").resources.len(), 1);

        assert!(!scan_once(&store, dir.path().to_path_buf(), vec![]).await);
        assert_eq!(store.version(), 2);
    }

    #[tokio::test]
    async fn test_scan_once_missing_dir_keeps_store() {
        let store = SnapshotStore::new();
        assert!(!scan_once(&store, PathBuf::from("/no/such/dir"), vec![]).await);
        assert!(!store.is_ready());
    }

    #[tokio::test]
    async fn test_watcher_picks_up_new_files_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(start_config_watcher(
            store.clone(),
            dir.path().to_path_buf(),
            vec![],
            Duration::from_millis(10),
            cancel.clone(),
        ));

        std::fs::write(dir.path().join("cfg.yaml"), "kind: Foo\n").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.snapshot("Foo").resources.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "watcher never saw file");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("watcher should stop after cancel")
            .unwrap();
    }
}
