//! Config server process configuration.
//!
//! The standalone binary (the form deployed into a cluster) is configured
//! from environment variables. The access token is redacted in Debug output.

use crate::args::{ServerArgs, DEFAULT_API_ADDRESS, DEFAULT_EXCLUDED_KINDS};
use common::config::{parse_bool, ObservabilityConfig};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default watcher poll interval in milliseconds.
pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 500;

/// Config server process configuration.
#[derive(Clone)]
pub struct Config {
    /// Server arguments derived from the environment.
    pub args: ServerArgs,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation; `ServerArgs` already redacts the token.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("args", &self.args)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },

    #[error(transparent)]
    Common(#[from] common::config::ConfigError),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let config_path = vars
            .get("CONFIG_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("CONFIG_PATH".to_string()))?;

        let mesh_config_file = vars
            .get("MESH_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_default();

        let api_address = vars
            .get("API_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_ADDRESS.to_string());

        // "off" disables the introspection listener entirely
        let introspection_port = match vars.get("INTROSPECTION_PORT").map(String::as_str) {
            None => ServerArgs::default().introspection_port,
            Some("off") => None,
            Some(value) => Some(value.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                name: "INTROSPECTION_PORT".to_string(),
                message: format!("must be a port number or 'off', got '{}': {}", value, e),
            })?),
        };

        let insecure = match vars.get("INSECURE") {
            Some(value) => parse_bool("INSECURE", value)?,
            None => false,
        };

        let access_token = vars.get("ACCESS_TOKEN").cloned().filter(|t| !t.is_empty());
        if !insecure && access_token.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "ACCESS_TOKEN (required unless INSECURE=true)".to_string(),
            ));
        }

        let excluded_resource_kinds = match vars.get("EXCLUDED_KINDS") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_EXCLUDED_KINDS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
        };

        let watch_interval_ms = match vars.get("WATCH_INTERVAL_MS") {
            Some(value) => {
                let ms: u64 = value.parse().map_err(|e| ConfigError::InvalidValue {
                    name: "WATCH_INTERVAL_MS".to_string(),
                    message: format!("must be a positive integer, got '{}': {}", value, e),
                })?;
                if ms == 0 {
                    return Err(ConfigError::InvalidValue {
                        name: "WATCH_INTERVAL_MS".to_string(),
                        message: "must be greater than zero".to_string(),
                    });
                }
                ms
            }
            None => DEFAULT_WATCH_INTERVAL_MS,
        };

        let observability = ObservabilityConfig::from_vars(vars)?;

        Ok(Self {
            args: ServerArgs {
                insecure,
                enable_server: true,
                disable_resource_ready_check: false,
                config_path,
                mesh_config_file,
                introspection_port,
                excluded_resource_kinds,
                api_address,
                access_token,
                watch_interval: Duration::from_millis(watch_interval_ms),
            },
            observability,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("CONFIG_PATH".to_string(), "/etc/config".to_string()),
            ("INSECURE".to_string(), "true".to_string()),
        ])
    }

    #[test]
    fn test_minimal_config() {
        let config = Config::from_vars(&base_vars()).unwrap();
        assert_eq!(config.args.config_path, PathBuf::from("/etc/config"));
        assert!(config.args.insecure);
        assert_eq!(config.args.api_address, DEFAULT_API_ADDRESS);
        assert_eq!(
            config.args.watch_interval,
            Duration::from_millis(DEFAULT_WATCH_INTERVAL_MS)
        );
        assert!(config.args.is_excluded("Secret"));
    }

    #[test]
    fn test_missing_config_path() {
        let err = Config::from_vars(&HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "CONFIG_PATH"));
    }

    #[test]
    fn test_secure_requires_token() {
        let mut vars = base_vars();
        vars.insert("INSECURE".to_string(), "false".to_string());
        assert!(Config::from_vars(&vars).is_err());

        vars.insert("ACCESS_TOKEN".to_string(), "abc".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.args.access_token.as_deref(), Some("abc"));
        assert!(!format!("{:?}", config).contains("abc"));
    }

    #[test]
    fn test_introspection_port_parsing() {
        let mut vars = base_vars();
        vars.insert("INTROSPECTION_PORT".to_string(), "off".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().args.introspection_port, None);

        vars.insert("INTROSPECTION_PORT".to_string(), "0".to_string());
        assert_eq!(
            Config::from_vars(&vars).unwrap().args.introspection_port,
            Some(0)
        );

        vars.insert("INTROSPECTION_PORT".to_string(), "x".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_excluded_kinds_override() {
        let mut vars = base_vars();
        vars.insert("EXCLUDED_KINDS".to_string(), " Foo, ,Bar ".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.args.excluded_resource_kinds, vec!["Foo", "Bar"]);
    }

    #[test]
    fn test_watch_interval_validation() {
        let mut vars = base_vars();
        vars.insert("WATCH_INTERVAL_MS".to_string(), "0".to_string());
        assert!(Config::from_vars(&vars).is_err());

        vars.insert("WATCH_INTERVAL_MS".to_string(), "250".to_string());
        assert_eq!(
            Config::from_vars(&vars).unwrap().args.watch_interval,
            Duration::from_millis(250)
        );
    }
}
