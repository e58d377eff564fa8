//! Server start-up arguments.

use crate::errors::ServerError;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default API address when none is configured.
pub const DEFAULT_API_ADDRESS: &str = "tcp://0.0.0.0:9901";

/// Default introspection (debug) port.
pub const DEFAULT_INTROSPECTION_PORT: u16 = 9876;

/// Default interval between config directory scans.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Kinds skipped unless the caller overrides the list.
pub const DEFAULT_EXCLUDED_KINDS: &[&str] = &["Secret", "Event", "Endpoints", "Node"];

/// Arguments controlling how a [`crate::Server`] starts.
///
/// `Default` matches a production-style deployment: secure, ready check on,
/// fixed ports. Test fixtures flip the relevant flags after taking the
/// defaults.
#[derive(Clone)]
pub struct ServerArgs {
    /// Skip bearer-token authentication on the API.
    pub insecure: bool,

    /// Bind and serve the HTTP API. When false the server only scans config.
    pub enable_server: bool,

    /// Report ready immediately instead of after the first config scan.
    pub disable_resource_ready_check: bool,

    /// Directory holding the YAML documents to serve.
    pub config_path: PathBuf,

    /// Mesh configuration file. Empty means no mesh config.
    pub mesh_config_file: PathBuf,

    /// Introspection listener port. `Some(0)` binds an ephemeral port, `None`
    /// disables the listener.
    pub introspection_port: Option<u16>,

    /// Document kinds never included in snapshots.
    pub excluded_resource_kinds: Vec<String>,

    /// API bind address in `tcp://host:port` form.
    pub api_address: String,

    /// Bearer token required on API requests when not insecure.
    pub access_token: Option<String>,

    /// How often the watcher rescans `config_path`.
    pub watch_interval: Duration,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            insecure: false,
            enable_server: true,
            disable_resource_ready_check: false,
            config_path: PathBuf::new(),
            mesh_config_file: PathBuf::new(),
            introspection_port: Some(DEFAULT_INTROSPECTION_PORT),
            excluded_resource_kinds: DEFAULT_EXCLUDED_KINDS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
            api_address: DEFAULT_API_ADDRESS.to_string(),
            access_token: None,
            watch_interval: DEFAULT_WATCH_INTERVAL,
        }
    }
}

/// Custom Debug implementation that redacts the access token.
impl fmt::Debug for ServerArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerArgs")
            .field("insecure", &self.insecure)
            .field("enable_server", &self.enable_server)
            .field(
                "disable_resource_ready_check",
                &self.disable_resource_ready_check,
            )
            .field("config_path", &self.config_path)
            .field("mesh_config_file", &self.mesh_config_file)
            .field("introspection_port", &self.introspection_port)
            .field("excluded_resource_kinds", &self.excluded_resource_kinds)
            .field("api_address", &self.api_address)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("watch_interval", &self.watch_interval)
            .finish()
    }
}

impl ServerArgs {
    /// Check the argument combination before anything is bound.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidArgs`] if the config path is missing, a
    /// secure server has no access token, or the watch interval is zero.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.config_path.as_os_str().is_empty() {
            return Err(ServerError::InvalidArgs(
                "config_path must be set".to_string(),
            ));
        }
        if !self.insecure && self.access_token.as_deref().map_or(true, str::is_empty) {
            return Err(ServerError::InvalidArgs(
                "secure mode requires an access token (set insecure to disable)".to_string(),
            ));
        }
        if self.watch_interval.is_zero() {
            return Err(ServerError::InvalidArgs(
                "watch_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse `api_address` into a socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidArgs`] if the scheme is not `tcp` or the
    /// remainder is not a `host:port` socket address.
    pub fn api_socket_addr(&self) -> Result<SocketAddr, ServerError> {
        parse_tcp_address(&self.api_address)
    }

    /// True if `kind` is in the excluded list.
    #[must_use]
    pub fn is_excluded(&self, kind: &str) -> bool {
        self.excluded_resource_kinds.iter().any(|k| k == kind)
    }
}

/// Parse a `tcp://host:port` address. A bare `host:port` is accepted too.
///
/// # Errors
///
/// Returns [`ServerError::InvalidArgs`] for other schemes or malformed
/// addresses.
pub fn parse_tcp_address(address: &str) -> Result<SocketAddr, ServerError> {
    let rest = match address.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(ServerError::InvalidArgs(format!(
                "unsupported address scheme '{}' in '{}'",
                scheme, address
            )))
        }
        None => address,
    };

    rest.parse().map_err(|e| {
        ServerError::InvalidArgs(format!("invalid address '{}': {}", address, e))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fixture_args() -> ServerArgs {
        ServerArgs {
            insecure: true,
            config_path: PathBuf::from("/tmp/config"),
            ..ServerArgs::default()
        }
    }

    #[test]
    fn test_defaults() {
        let args = ServerArgs::default();
        assert!(!args.insecure);
        assert!(args.enable_server);
        assert!(!args.disable_resource_ready_check);
        assert_eq!(args.introspection_port, Some(DEFAULT_INTROSPECTION_PORT));
        assert_eq!(args.api_address, DEFAULT_API_ADDRESS);
        assert!(args.is_excluded("Secret"));
    }

    #[test]
    fn test_validate_requires_config_path() {
        let args = ServerArgs {
            config_path: PathBuf::new(),
            ..fixture_args()
        };
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("config_path"));
    }

    #[test]
    fn test_validate_secure_requires_token() {
        let args = ServerArgs {
            insecure: false,
            ..fixture_args()
        };
        assert!(args.validate().is_err());

        let args = ServerArgs {
            insecure: false,
            access_token: Some("token".to_string()),
            ..fixture_args()
        };
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_tcp_address() {
        let addr = parse_tcp_address("tcp://0.0.0.0:0").unwrap();
        assert_eq!(addr.port(), 0);

        let addr = parse_tcp_address("127.0.0.1:8080").unwrap();
        assert_eq!(addr.port(), 8080);

        assert!(parse_tcp_address("udp://127.0.0.1:1").is_err());
        assert!(parse_tcp_address("tcp://localhost").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let args = ServerArgs {
            access_token: Some("super-secret".to_string()),
            ..fixture_args()
        };
        let debug = format!("{:?}", args);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
