//! Tracing subscriber initialisation.
//!
//! Services call [`init_tracing`] once from `main`. Test code calls
//! [`init_test_tracing`], which routes output through the libtest capture
//! writer and tolerates being called from many tests in one process.

use crate::config::ObservabilityConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Error returned when a global subscriber is already installed.
pub type InitError = tracing_subscriber::util::TryInitError;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_level` so operators can
/// narrow the filter without touching service configuration.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    }
}

/// Install a test-friendly subscriber if none is installed yet.
///
/// Defaults to `debug` for the framework crates so failing tests show the
/// fixture lifecycle in their captured output.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("fixture_framework=debug,config_server=debug,tower_http=info")
    });

    // Another test in this process may already have installed one.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
