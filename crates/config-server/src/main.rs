//! Config Server
//!
//! Standalone entry point. This is the process deployed into a cluster and
//! reached by fixtures through a port-forward tunnel.

use config_server::config::Config;
use config_server::Server;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    common::observability::init_tracing(&config.observability)?;

    info!(config = ?config, "Configuration loaded successfully");

    let mut server = Server::start(config.args).await.map_err(|e| {
        error!(error = %e, "Failed to start config server");
        e
    })?;

    info!(
        api_addr = ?server.address(),
        introspection_addr = ?server.introspection_address(),
        "Config server listening"
    );

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.close().await?;
    info!("Config server stopped");
    Ok(())
}
