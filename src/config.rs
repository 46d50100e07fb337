//! Gateway Configuration
//!
//! Loaded once from environment variables in `main` and handed down
//! explicitly; nothing else reads the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::network::auth::AuthConfig;
use crate::network::server::ServerConfig;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("invalid {name}: {value:?}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address (`WS_ADDRESS`). A bare `:port` binds all interfaces.
    pub ws_address: SocketAddr,
    /// Debug logging (`DEBUG`).
    pub debug: bool,
    /// External broker URL (`BROKER_URL`); in-process broker when unset.
    pub broker_url: Option<String>,
    /// Token verification key (`SECRET_KEY`).
    pub secret_key: Option<String>,
    /// Realm resolution bound (`REALM_RESOLVE_TIMEOUT_MS`).
    pub realm_resolve_timeout: Duration,
    /// Per-session outbound queue capacity (`OUTBOUND_QUEUE_SIZE`).
    pub outbound_queue_size: usize,
    /// Registry command queue capacity (`HUB_QUEUE_SIZE`).
    pub hub_queue_size: usize,
    /// Connection cap (`MAX_CONNECTIONS`).
    pub max_connections: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_address: SocketAddr::from(([0, 0, 0, 0], 8087)),
            debug: false,
            broker_url: None,
            secret_key: None,
            realm_resolve_timeout: Duration::from_millis(2000),
            outbound_queue_size: 256,
            hub_queue_size: 1024,
            max_connections: 10_000,
        }
    }
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any variable source. Unset or empty variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            ws_address: match var("WS_ADDRESS") {
                Some(v) => parse_address(&v)?,
                None => defaults.ws_address,
            },
            debug: match var("DEBUG") {
                Some(v) => parse_bool("DEBUG", &v)?,
                None => defaults.debug,
            },
            broker_url: var("BROKER_URL"),
            secret_key: var("SECRET_KEY"),
            realm_resolve_timeout: match var("REALM_RESOLVE_TIMEOUT_MS") {
                Some(v) => Duration::from_millis(parse_number("REALM_RESOLVE_TIMEOUT_MS", &v)?),
                None => defaults.realm_resolve_timeout,
            },
            outbound_queue_size: parse_or("OUTBOUND_QUEUE_SIZE", var("OUTBOUND_QUEUE_SIZE"), defaults.outbound_queue_size)?,
            hub_queue_size: parse_or("HUB_QUEUE_SIZE", var("HUB_QUEUE_SIZE"), defaults.hub_queue_size)?,
            max_connections: parse_or("MAX_CONNECTIONS", var("MAX_CONNECTIONS"), defaults.max_connections)?,
        })
    }

    /// Token verification settings.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            secret: self.secret_key.clone(),
            ..Default::default()
        }
    }

    /// WebSocket server settings.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.ws_address,
            max_connections: self.max_connections,
            outbound_queue_size: self.outbound_queue_size,
            ..Default::default()
        }
    }
}

fn parse_address(value: &str) -> Result<SocketAddr, ConfigError> {
    let full = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => value.to_string(),
    };
    full.parse().map_err(|_| ConfigError::Invalid {
        name: "WS_ADDRESS",
        value: value.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn parse_or(name: &'static str, value: Option<String>, default: usize) -> Result<usize, ConfigError> {
    match value {
        Some(v) => match parse_number(name, &v)? {
            0 => Err(ConfigError::Invalid { name, value: v }),
            n => Ok(n),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        GatewayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.ws_address, "0.0.0.0:8087".parse().unwrap());
        assert!(!config.debug);
        assert!(config.broker_url.is_none());
        assert_eq!(config.realm_resolve_timeout, Duration::from_secs(2));
        assert_eq!(config.outbound_queue_size, 256);
        assert_eq!(config.max_connections, 10_000);
    }

    #[test]
    fn test_bare_port_address() {
        let config = load(&[("WS_ADDRESS", ":9000")]).unwrap();
        assert_eq!(config.ws_address, "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WS_ADDRESS", "127.0.0.1:7000"),
            ("DEBUG", "true"),
            ("BROKER_URL", "redis://localhost:6379"),
            ("SECRET_KEY", "s3cret"),
            ("REALM_RESOLVE_TIMEOUT_MS", "500"),
            ("OUTBOUND_QUEUE_SIZE", "16"),
        ])
        .unwrap();
        assert!(config.debug);
        assert_eq!(config.broker_url.as_deref(), Some("redis://localhost:6379"));
        assert!(config.auth_config().is_configured());
        assert_eq!(config.realm_resolve_timeout, Duration::from_millis(500));
        assert_eq!(config.server_config().outbound_queue_size, 16);
        assert_eq!(config.server_config().bind_addr, "127.0.0.1:7000".parse().unwrap());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(load(&[("DEBUG", "maybe")]), Err(ConfigError::Invalid { name: "DEBUG", .. })));
        assert!(matches!(
            load(&[("WS_ADDRESS", "nowhere")]),
            Err(ConfigError::Invalid { name: "WS_ADDRESS", .. })
        ));
        assert!(matches!(
            load(&[("OUTBOUND_QUEUE_SIZE", "0")]),
            Err(ConfigError::Invalid { name: "OUTBOUND_QUEUE_SIZE", .. })
        ));
    }

    #[test]
    fn test_empty_secret_is_unset() {
        let config = load(&[("SECRET_KEY", "")]).unwrap();
        assert!(config.secret_key.is_none());
        assert!(!config.auth_config().is_configured());
    }
}
