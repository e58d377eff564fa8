//! HTTP client for a component's config server endpoint.

use crate::config::Timeouts;
use crate::errors::FixtureError;
use crate::eventual::wait_until;
use crate::resource::ResourceId;
use config_server::handlers::HealthResponse;
use config_server::SnapshotResponse;
use reqwest::StatusCode;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, instrument};

/// Per-request timeout; readiness waits retry on top of it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a live component endpoint.
///
/// Owns the connection pool to the endpoint; [`Client::close`] drops it and
/// every later request fails with [`FixtureError::Closed`].
pub struct Client {
    owner: ResourceId,
    address: String,
    base_url: String,
    access_token: Option<String>,
    timeouts: Timeouts,
    http: RwLock<Option<reqwest::Client>>,
}

impl Client {
    /// Client for the endpoint at `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Client`] if the HTTP client cannot be built.
    pub fn new(owner: ResourceId, address: &str, timeouts: Timeouts) -> Result<Self, FixtureError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FixtureError::Client(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            owner,
            address: address.to_string(),
            base_url: format!("http://{}", address),
            access_token: None,
            timeouts,
            http: RwLock::new(Some(http)),
        })
    }

    /// Send `token` as a bearer token on API requests.
    #[must_use]
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    /// `host:port` this client talks to.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn http(&self) -> Result<reqwest::Client, FixtureError> {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| FixtureError::Closed(self.owner.clone()))
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, FixtureError> {
        let mut request = self
            .http()?
            .get(format!("{}{}", self.base_url, path))
            .query(query);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|e| FixtureError::Client(format!("GET {} failed: {}", path, e)))
    }

    /// Health of the endpoint. Succeeds only on a ready server.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Client`] on transport failure or a non-200
    /// answer.
    pub async fn health(&self) -> Result<HealthResponse, FixtureError> {
        let response = self.get("/v1/health", &[]).await?;
        if response.status() != StatusCode::OK {
            return Err(FixtureError::Client(format!(
                "health check returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| FixtureError::Client(format!("invalid health response: {}", e)))
    }

    /// Block until the endpoint answers a health check (bounded by the
    /// startup timeout).
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::ReadinessTimeout`] if it never answers, or
    /// [`FixtureError::Closed`] if the client is closed.
    #[instrument(skip_all, fields(address = %self.address))]
    pub async fn wait_for_startup(&self) -> Result<(), FixtureError> {
        // Fail fast instead of polling a closed client until the deadline.
        self.http()?;

        let client = self;
        let health = wait_until(
            &format!("config server at {}", self.address),
            self.timeouts.startup,
            move || async move { client.health().await.map_err(|e| e.to_string()) },
        )
        .await?;

        debug!(version = health.version, "Config server answering");
        Ok(())
    }

    /// Current snapshot of `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Client`] on transport failure or a non-200
    /// answer.
    pub async fn snapshot(&self, collection: &str) -> Result<SnapshotResponse, FixtureError> {
        let response = self
            .get("/v1/snapshots", &[("collection", collection)])
            .await?;
        if !response.status().is_success() {
            return Err(FixtureError::Client(format!(
                "snapshot of {} returned {}",
                collection,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| FixtureError::Client(format!("invalid snapshot response: {}", e)))
    }

    /// Mesh configuration served by the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Client`] on transport failure or a non-200
    /// answer.
    pub async fn mesh_config(&self) -> Result<serde_json::Value, FixtureError> {
        let response = self.get("/v1/meshconfig", &[]).await?;
        if !response.status().is_success() {
            return Err(FixtureError::Client(format!(
                "mesh config returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| FixtureError::Client(format!("invalid mesh config response: {}", e)))
    }

    /// Block until the snapshot of `collection` holds exactly `expected`, in
    /// any order (bounded by the snapshot timeout).
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::ReadinessTimeout`] describing the last
    /// mismatch, or [`FixtureError::Closed`] if the client is closed.
    #[instrument(skip_all, fields(address = %self.address, collection = %collection))]
    pub async fn wait_for_snapshot(
        &self,
        collection: &str,
        expected: &[serde_json::Value],
    ) -> Result<(), FixtureError> {
        self.http()?;

        let want = canonical(expected);
        let want = want.as_slice();
        let client = self;

        let version = wait_until(
            &format!("snapshot of {}", collection),
            self.timeouts.snapshot,
            move || async move {
                let snapshot = client
                    .snapshot(collection)
                    .await
                    .map_err(|e| e.to_string())?;
                let got = canonical(&snapshot.resources);
                if got.as_slice() == want {
                    Ok(snapshot.version)
                } else {
                    Err(format!(
                        "version {} has {} resources, expected {}",
                        snapshot.version,
                        got.len(),
                        want.len()
                    ))
                }
            },
        )
        .await?;

        debug!(version, "Snapshot matched");
        Ok(())
    }

    /// Release the connection pool. Idempotent.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other close operations
    /// so callers aggregate uniformly.
    pub async fn close(&self) -> Result<(), FixtureError> {
        let previous = self
            .http
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            debug!(owner = %self.owner, address = %self.address, "Client closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("owner", &self.owner)
            .field("address", &self.address)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Order-insensitive form of a resource list.
fn canonical(resources: &[serde_json::Value]) -> Vec<String> {
    let mut out: Vec<String> = resources.iter().map(|r| r.to_string()).collect();
    out.sort();
    out
}
