//! Broker configuration.
//!
//! A [`BrokerConfig`] is resolved fresh on every start from three layers:
//! explicit start options, then a [`ConfigSource`] (normally the process
//! environment), then built-in defaults.
//!
//! Keys read from the source:
//! - `PORT` - listener port, default 8000
//! - `HOST` - listener bind address, default "localhost"
//! - `ENDPOINT` - a single upstream endpoint, used when no explicit
//!   endpoints are given
//!
//! Reading goes through [`ConfigSource`] so the environment can be captured
//! once at the edge of the process ([`EnvSnapshot`]) and passed in as data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "localhost";

pub const PORT_VAR: &str = "PORT";
pub const HOST_VAR: &str = "HOST";
pub const ENDPOINT_VAR: &str = "ENDPOINT";

/// Errors that can occur while resolving a broker configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value: {0:?}")]
    InvalidPort(String),

    #[error("Cannot resolve listener address {host}:{port}: {reason}")]
    Unresolvable {
        host: String,
        port: u16,
        reason: String,
    },
}

/// A provider of configuration values by key.
pub trait ConfigSource: Send + Sync {
    /// Look up a value. Empty values count as absent.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the live process environment on every lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// A fixed set of values, typically captured from the environment once.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    values: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture `PORT`, `HOST` and `ENDPOINT` from the process environment.
    pub fn capture() -> Self {
        let values = [PORT_VAR, HOST_VAR, ENDPOINT_VAR]
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self { values }
    }

    /// Build a snapshot from literal pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// An empty snapshot: every key falls back to its default.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl ConfigSource for EnvSnapshot {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Resolved listener configuration handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub port: u16,
    pub host: String,
    pub endpoints: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            endpoints: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Resolve a configuration.
    ///
    /// Port and host come only from the source or the defaults. Endpoints
    /// follow the fallback policy: a non-empty explicit list is used
    /// verbatim, otherwise `ENDPOINT` (if set) becomes the only entry.
    pub fn resolve(
        source: &dyn ConfigSource,
        explicit_endpoints: Option<&[String]>,
    ) -> Result<Self, ConfigError> {
        let port = match source.get(PORT_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
            None => DEFAULT_PORT,
        };

        let host = source
            .get(HOST_VAR)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let endpoints = match explicit_endpoints {
            Some(list) if !list.is_empty() => list.to_vec(),
            _ => source.get(ENDPOINT_VAR).into_iter().collect(),
        };

        Ok(Self {
            port,
            host,
            endpoints,
        })
    }

    /// Resolve `host:port` to the first matching socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let unresolvable = |reason: String| ConfigError::Unresolvable {
            host: self.host.clone(),
            port: self.port,
            reason,
        };

        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| unresolvable(e.to_string()))?
            .next()
            .ok_or_else(|| unresolvable("no addresses".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::resolve(&EnvSnapshot::empty(), None).unwrap();
        assert_eq!(
            config,
            BrokerConfig {
                port: 8000,
                host: "localhost".to_string(),
                endpoints: vec![],
            }
        );
    }

    #[test]
    fn test_port_from_source() {
        let source = EnvSnapshot::from_pairs([("PORT", "9999")]);
        let config = BrokerConfig::resolve(&source, None).unwrap();
        assert_eq!(config.port, 9999);
    }

    #[test]
    fn test_invalid_port() {
        let source = EnvSnapshot::from_pairs([("PORT", "http")]);
        let err = BrokerConfig::resolve(&source, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(ref v) if v == "http"));
    }

    #[test]
    fn test_empty_values_fall_back() {
        let source = EnvSnapshot::from_pairs([("PORT", ""), ("HOST", ""), ("ENDPOINT", "")]);
        let config = BrokerConfig::resolve(&source, None).unwrap();
        assert_eq!(config, BrokerConfig::default());
    }

    #[test]
    fn test_host_from_source() {
        let source = EnvSnapshot::from_pairs([("HOST", "0.0.0.0")]);
        let config = BrokerConfig::resolve(&source, None).unwrap();
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_endpoint_fallback_when_explicit_list_empty() {
        let source = EnvSnapshot::from_pairs([("ENDPOINT", "coap://node1")]);
        let config = BrokerConfig::resolve(&source, Some(&[])).unwrap();
        assert_eq!(config.endpoints, vec!["coap://node1".to_string()]);
    }

    #[test]
    fn test_explicit_endpoints_used_verbatim() {
        let explicit = vec!["coap://a".to_string()];
        let config = BrokerConfig::resolve(&EnvSnapshot::empty(), Some(&explicit)).unwrap();
        assert_eq!(config.endpoints, explicit);
    }

    #[test]
    fn test_explicit_endpoints_win_over_environment() {
        let source = EnvSnapshot::from_pairs([("ENDPOINT", "ws://upstream")]);
        let explicit = vec!["ws://a".to_string(), "ws://b".to_string()];
        let config = BrokerConfig::resolve(&source, Some(&explicit)).unwrap();
        assert_eq!(config.endpoints, explicit);
    }

    #[test]
    fn test_bind_addr() {
        let config = BrokerConfig {
            port: 5683,
            host: "127.0.0.1".to_string(),
            endpoints: vec![],
        };
        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:5683".parse().unwrap());
    }
}
