//! Server configuration read from `TXWEAVE_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use txweave_core::RetryPolicy;
use txweave_engine::EngineConfig;

pub const LISTEN_ENV: &str = "TXWEAVE_LISTEN";
pub const STORE_ENV: &str = "TXWEAVE_STORE";
pub const DATABASE_URL_ENV: &str = "TXWEAVE_DATABASE_URL";
pub const RETRY_BASE_MS_ENV: &str = "TXWEAVE_RETRY_BASE_MS";
pub const RETRY_MAX_MS_ENV: &str = "TXWEAVE_RETRY_MAX_MS";
pub const REQUEST_TIMEOUT_MS_ENV: &str = "TXWEAVE_REQUEST_TIMEOUT_MS";
pub const LEASE_MS_ENV: &str = "TXWEAVE_LEASE_MS";
pub const STUCK_AFTER_ENV: &str = "TXWEAVE_STUCK_AFTER";

const DEFAULT_LISTEN: &str = "0.0.0.0:36789";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown store {0:?} (expected `memory` or `sql`)")]
    UnknownStore(String),

    #[error("TXWEAVE_DATABASE_URL is required when TXWEAVE_STORE=sql")]
    MissingDatabaseUrl,
}

/// Where transaction records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sql { url: String, max_connections: u32 },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub store: StoreKind,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_raw = lookup(LISTEN_ENV).unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = listen_raw
            .parse::<SocketAddr>()
            .map_err(|e| invalid(LISTEN_ENV, &listen_raw, e))?;

        let store = match lookup(STORE_ENV)
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("memory") => StoreKind::Memory,
            Some("sql") => StoreKind::Sql {
                url: lookup(DATABASE_URL_ENV)
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigError::MissingDatabaseUrl)?,
                max_connections: DEFAULT_MAX_CONNECTIONS,
            },
            Some(other) => return Err(ConfigError::UnknownStore(other.to_string())),
        };

        let defaults = RetryPolicy::default();
        let base = millis(&lookup, RETRY_BASE_MS_ENV)?.unwrap_or(defaults.base_delay);
        let max = millis(&lookup, RETRY_MAX_MS_ENV)?.unwrap_or(defaults.max_delay);
        if max < base {
            return Err(ConfigError::Invalid {
                var: RETRY_MAX_MS_ENV,
                value: max.as_millis().to_string(),
                reason: "must not be below the base delay".into(),
            });
        }
        let mut retry = RetryPolicy::exponential(base, max);
        if let Some(raw) = lookup(STUCK_AFTER_ENV) {
            let stuck_after = raw
                .trim()
                .parse::<u32>()
                .map_err(|e| invalid(STUCK_AFTER_ENV, &raw, e))?;
            retry = retry.with_stuck_after(stuck_after);
        }

        let mut engine = EngineConfig::default().with_retry(retry);
        if let Some(timeout) = millis(&lookup, REQUEST_TIMEOUT_MS_ENV)? {
            if timeout.is_zero() {
                return Err(ConfigError::Invalid {
                    var: REQUEST_TIMEOUT_MS_ENV,
                    value: "0".into(),
                    reason: "must be positive".into(),
                });
            }
            engine = engine.with_request_timeout(timeout);
        }
        if let Some(lease) = millis(&lookup, LEASE_MS_ENV)? {
            engine = engine.with_lease(lease);
        }
        // A lease is renewed before each call, so a call must not outlive it.
        if engine.lease <= engine.request_timeout {
            return Err(ConfigError::Invalid {
                var: REQUEST_TIMEOUT_MS_ENV,
                value: engine.request_timeout.as_millis().to_string(),
                reason: format!(
                    "must be below the {}ms lease ({LEASE_MS_ENV})",
                    engine.lease.as_millis()
                ),
            });
        }

        Ok(Self {
            listen,
            store,
            engine,
        })
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| invalid(var, &raw, e))
        })
        .transpose()
}

fn invalid(var: &'static str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_to_memory_store() {
        let config = config(&[]).unwrap();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.listen.port(), 36789);
        assert_eq!(config.engine.retry, RetryPolicy::default());
    }

    #[test]
    fn reads_sql_store_and_retry_settings() {
        let config = config(&[
            (LISTEN_ENV, "127.0.0.1:9000"),
            (STORE_ENV, "SQL"),
            (DATABASE_URL_ENV, "postgres://tx@db/txweave"),
            (RETRY_BASE_MS_ENV, "250"),
            (RETRY_MAX_MS_ENV, "4000"),
            (REQUEST_TIMEOUT_MS_ENV, "1500"),
            (LEASE_MS_ENV, "5000"),
            (STUCK_AFTER_ENV, "5"),
        ])
        .unwrap();
        assert_eq!(
            config.store,
            StoreKind::Sql {
                url: "postgres://tx@db/txweave".into(),
                max_connections: DEFAULT_MAX_CONNECTIONS,
            }
        );
        assert_eq!(config.engine.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.engine.retry.max_delay, Duration::from_secs(4));
        assert_eq!(config.engine.retry.stuck_after, 5);
        assert_eq!(config.engine.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.engine.lease, Duration::from_secs(5));
    }

    #[test]
    fn rejects_a_request_timeout_the_lease_cannot_cover() {
        assert!(matches!(
            config(&[(REQUEST_TIMEOUT_MS_ENV, "60000")]),
            Err(ConfigError::Invalid { var: REQUEST_TIMEOUT_MS_ENV, .. })
        ));
        assert!(matches!(
            config(&[(REQUEST_TIMEOUT_MS_ENV, "2000"), (LEASE_MS_ENV, "2000")]),
            Err(ConfigError::Invalid { var: REQUEST_TIMEOUT_MS_ENV, .. })
        ));
        let config = config(&[(REQUEST_TIMEOUT_MS_ENV, "60000"), (LEASE_MS_ENV, "90000")]).unwrap();
        assert_eq!(config.engine.lease, Duration::from_secs(90));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            config(&[(RETRY_BASE_MS_ENV, "soon")]),
            Err(ConfigError::Invalid { var: RETRY_BASE_MS_ENV, .. })
        ));
        assert!(matches!(
            config(&[(LISTEN_ENV, "nowhere")]),
            Err(ConfigError::Invalid { var: LISTEN_ENV, .. })
        ));
        assert_eq!(
            config(&[(STORE_ENV, "redis")]).unwrap_err(),
            ConfigError::UnknownStore("redis".into())
        );
        assert_eq!(
            config(&[(STORE_ENV, "sql")]).unwrap_err(),
            ConfigError::MissingDatabaseUrl
        );
        assert!(config(&[(RETRY_BASE_MS_ENV, "500"), (RETRY_MAX_MS_ENV, "100")]).is_err());
        assert!(config(&[(REQUEST_TIMEOUT_MS_ENV, "0")]).is_err());
    }
}
