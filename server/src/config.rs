use std::net::SocketAddr;

use thiserror::Error;

const DEFAULT_ADDR: &str = "127.0.0.1:50051";
const DEFAULT_WORKERS: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MATMUL_ADDR must be a socket address, got {value:?}: {source}")]
    Addr {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("MATMUL_WORKERS must be a positive integer, got {0:?}")]
    Workers(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// gRPC listen address.
    pub addr: SocketAddr,
    /// Initial size of the worker pool.
    pub workers: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var          | Default           |
    /// |------------------|-------------------|
    /// | `MATMUL_ADDR`    | `127.0.0.1:50051` |
    /// | `MATMUL_WORKERS` | `5`               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_addr = lookup("MATMUL_ADDR").unwrap_or_else(|| DEFAULT_ADDR.into());
        let addr: SocketAddr = raw_addr.parse().map_err(|source| ConfigError::Addr {
            value: raw_addr.clone(),
            source,
        })?;

        let workers = match lookup("MATMUL_WORKERS") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::Workers(raw)),
            },
            None => DEFAULT_WORKERS,
        };

        Ok(Self { addr, workers })
    }
}
