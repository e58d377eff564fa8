//! Counting server launcher for native-environment tests.
//!
//! Runs the real embedded config server, but records every start and close
//! so tests can check that generations never overlap, and can inject a start
//! failure.

use async_trait::async_trait;
use config_server::{ServerArgs, ServerError};
use fixture_framework::environment::{EmbeddedServerLauncher, ServerHandle, ServerLauncher};
use fixture_framework::FixtureError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Start/close accounting shared between a [`MockLauncher`] and its
/// handles.
#[derive(Debug, Default)]
pub struct LaunchStats {
    attempts: AtomicUsize,
    started: AtomicUsize,
    closed: AtomicUsize,
    max_live: AtomicUsize,
}

impl LaunchStats {
    /// Calls to `start`, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Servers successfully started.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Servers closed (each counted once).
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Servers currently running.
    pub fn live(&self) -> usize {
        self.started() - self.closed()
    }

    /// Highest number of servers that were running at the same time.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

/// Launcher wrapping [`EmbeddedServerLauncher`].
#[derive(Debug, Default)]
pub struct MockLauncher {
    fail_on_attempt: Option<usize>,
    stats: Arc<LaunchStats>,
}

impl MockLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `attempt`-th start (1-based).
    #[must_use]
    pub fn fail_on_attempt(mut self, attempt: usize) -> Self {
        self.fail_on_attempt = Some(attempt);
        self
    }

    #[must_use]
    pub fn stats(&self) -> Arc<LaunchStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl ServerLauncher for MockLauncher {
    async fn start(&self, args: ServerArgs) -> Result<Box<dyn ServerHandle>, FixtureError> {
        let attempt = self.stats.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_attempt == Some(attempt) {
            return Err(FixtureError::Server(ServerError::InvalidArgs(format!(
                "injected start failure on attempt {}",
                attempt
            ))));
        }

        let inner = EmbeddedServerLauncher.start(args).await?;
        let started = self.stats.started.fetch_add(1, Ordering::SeqCst) + 1;
        let live = started - self.stats.closed();
        self.stats.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(CountingHandle {
            inner,
            closed: false,
            stats: self.stats.clone(),
        }))
    }
}

struct CountingHandle {
    inner: Box<dyn ServerHandle>,
    closed: bool,
    stats: Arc<LaunchStats>,
}

#[async_trait]
impl ServerHandle for CountingHandle {
    fn address(&self) -> Option<SocketAddr> {
        self.inner.address()
    }

    async fn close(&mut self) -> Result<(), FixtureError> {
        let result = self.inner.close().await;
        if !self.closed {
            self.closed = true;
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}
