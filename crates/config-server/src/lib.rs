//! # Config Server
//!
//! A small file-backed configuration server. It watches a directory of YAML
//! documents, groups them into per-kind snapshots, and serves those snapshots
//! over HTTP so test fixtures can observe what the server has picked up.
//!
//! The server is embeddable: [`Server::start`] binds its listeners, spawns the
//! serving and watcher loops as background tasks, and returns a handle that
//! owns their shutdown.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use config_server::{Server, ServerArgs};
//!
//! let mut args = ServerArgs::default();
//! args.insecure = true;
//! args.config_path = "/tmp/config".into();
//! args.api_address = "tcp://127.0.0.1:0".to_string();
//!
//! let mut server = Server::start(args).await?;
//! println!("serving on {:?}", server.address());
//! server.close().await?;
//! ```

pub mod args;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod mesh;
pub mod routes;
pub mod server;
pub mod snapshot;
pub mod watcher;

pub use args::ServerArgs;
pub use errors::ServerError;
pub use server::Server;
pub use snapshot::{SnapshotResponse, SnapshotStore};
