//! Embeddable config server.
//!
//! [`Server::start`] binds every listener first, then spawns the serving,
//! introspection and watcher loops. Ownership of their shutdown stays with the
//! returned [`Server`]: [`Server::close`] cancels and joins them, and dropping
//! an unclosed server cancels them without waiting.

use crate::args::ServerArgs;
use crate::errors::ServerError;
use crate::mesh;
use crate::routes::{self, AppState};
use crate::snapshot::SnapshotStore;
use crate::watcher;
use common::error::ErrorList;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on waiting for each background task during close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type TaskHandle = JoinHandle<Result<(), ServerError>>;

/// A running config server.
pub struct Server {
    api_addr: Option<SocketAddr>,
    introspection_addr: Option<SocketAddr>,
    store: Arc<SnapshotStore>,
    cancel_token: CancellationToken,
    tasks: Vec<(&'static str, TaskHandle)>,
}

impl Server {
    /// Start a server with the given arguments.
    ///
    /// The server will:
    /// - Load the mesh config file (if configured)
    /// - Scan the config directory once
    /// - Bind the API listener (if enabled) and the introspection listener
    ///   (if a port is configured)
    /// - Spawn the watcher and serving loops in the background
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the arguments are invalid, the mesh config
    /// cannot be loaded, or a listener cannot be bound. Nothing is left
    /// running on error.
    pub async fn start(args: ServerArgs) -> Result<Self, ServerError> {
        args.validate()?;

        let mesh_config = mesh::load_mesh_config(&args.mesh_config_file)?;

        let store = Arc::new(SnapshotStore::new());
        if args.disable_resource_ready_check {
            store.mark_ready();
        }
        watcher::scan_once(
            &store,
            args.config_path.clone(),
            args.excluded_resource_kinds.clone(),
        )
        .await;

        // Bind everything before spawning so a bind failure leaks no task
        let api_listener = if args.enable_server {
            let addr = args.api_socket_addr()?;
            Some(bind("api", &args.api_address, addr).await?)
        } else {
            None
        };

        let introspection_listener = match args.introspection_port {
            Some(port) => {
                let addr = SocketAddr::from(([127, 0, 0, 1], port));
                Some(bind("introspection", &addr.to_string(), addr).await?)
            }
            None => None,
        };

        let api_addr = local_addr("api", api_listener.as_ref())?;
        let introspection_addr = local_addr("introspection", introspection_listener.as_ref())?;

        let cancel_token = CancellationToken::new();
        let state = Arc::new(AppState {
            store: store.clone(),
            mesh_config,
            args: args.clone(),
        });

        let mut tasks: Vec<(&'static str, TaskHandle)> = Vec::new();

        {
            let store = store.clone();
            let token = cancel_token.clone();
            let config_path = args.config_path.clone();
            let excluded = args.excluded_resource_kinds.clone();
            let interval = args.watch_interval;
            tasks.push((
                "watcher",
                tokio::spawn(async move {
                    watcher::start_config_watcher(store, config_path, excluded, interval, token)
                        .await;
                    Ok(())
                }),
            ));
        }

        if let Some(listener) = api_listener {
            let app = routes::build_routes(state.clone());
            tasks.push(("api", serve("api", listener, app, cancel_token.clone())));
        }

        if let Some(listener) = introspection_listener {
            let app = routes::build_introspection_routes(state);
            tasks.push((
                "introspection",
                serve("introspection", listener, app, cancel_token.clone()),
            ));
        }

        info!(
            target: "config_server.server",
            api_addr = ?api_addr,
            introspection_addr = ?introspection_addr,
            config_path = %args.config_path.display(),
            insecure = args.insecure,
            "Config server started"
        );

        Ok(Self {
            api_addr,
            introspection_addr,
            store,
            cancel_token,
            tasks,
        })
    }

    /// Bound API address, or `None` when the API server is disabled.
    #[must_use]
    pub fn address(&self) -> Option<SocketAddr> {
        self.api_addr
    }

    /// Bound introspection address, if enabled.
    #[must_use]
    pub fn introspection_address(&self) -> Option<SocketAddr> {
        self.introspection_addr
    }

    /// Snapshot store backing this server.
    #[must_use]
    pub fn store(&self) -> Arc<SnapshotStore> {
        self.store.clone()
    }

    /// True while background tasks are still owned by this handle.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Stop all background tasks and wait for them to finish.
    ///
    /// Idempotent: a second call finds no tasks and returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the failure of a task that ended abnormally or did not stop in
    /// time; several failures are combined into [`ServerError::Multiple`].
    pub async fn close(&mut self) -> Result<(), ServerError> {
        if self.tasks.is_empty() {
            return Ok(());
        }

        self.cancel_token.cancel();

        let mut errors = ErrorList::new();
        for (task, mut handle) in self.tasks.drain(..) {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(result)) => errors.push_result(result),
                Ok(Err(e)) => errors.push(ServerError::Task {
                    task,
                    message: e.to_string(),
                }),
                Err(_) => {
                    handle.abort();
                    errors.push(ServerError::Task {
                        task,
                        message: format!("did not stop within {:?}", SHUTDOWN_TIMEOUT),
                    });
                }
            }
        }

        debug!(
            target: "config_server.server",
            api_addr = ?self.api_addr,
            failures = errors.len(),
            "Config server closed"
        );
        errors.into_result(ServerError::Multiple)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            warn!(
                target: "config_server.server",
                api_addr = ?self.api_addr,
                "Config server dropped without close; cancelling background tasks"
            );
            self.cancel_token.cancel();
        }
    }
}

async fn bind(
    what: &'static str,
    display: &str,
    addr: SocketAddr,
) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            what,
            address: display.to_string(),
            source,
        })
}

fn local_addr(
    what: &'static str,
    listener: Option<&TcpListener>,
) -> Result<Option<SocketAddr>, ServerError> {
    listener
        .map(|l| {
            l.local_addr().map_err(|source| ServerError::Bind {
                what,
                address: "local address".to_string(),
                source,
            })
        })
        .transpose()
}

fn serve(
    task: &'static str,
    listener: TcpListener,
    app: axum::Router,
    token: CancellationToken,
) -> TaskHandle {
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(|e| ServerError::Task {
                task,
                message: e.to_string(),
            })
    })
}
