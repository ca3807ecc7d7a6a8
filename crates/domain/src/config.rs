//! Environment-driven configuration for processes embedding the scanner.

use std::env;
use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use thiserror::Error;

/// Default upper bound on one global-index request to the node.
pub const DEFAULT_GLOBAL_INDEX_TIMEOUT: Duration = Duration::from_secs(30);

/// The parallel matcher never runs with fewer workers than this.
pub const MIN_WORKER_THREADS: usize = 2;

/// Scanner configuration derived from `.env`/process variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    node_rpc_url: String,
    worker_threads: Option<usize>,
    global_index_timeout: Duration,
}

impl ScannerConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// process variables. Missing or malformed entries surface as
    /// `ConfigError`.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let node_rpc_url = get_required_var("NODE_RPC_URL")?;
        let worker_threads = get_optional_var("SCANNER_WORKER_THREADS")
            .map(|value| {
                value
                    .parse::<usize>()
                    .map_err(|source| ConfigError::InvalidNumber {
                        key: "SCANNER_WORKER_THREADS",
                        source,
                    })
            })
            .transpose()?;
        let global_index_timeout = match get_optional_var("SCANNER_GLOBAL_INDEX_TIMEOUT_SECS") {
            Some(value) => {
                let secs: u64 = value.parse().map_err(|source| ConfigError::InvalidNumber {
                    key: "SCANNER_GLOBAL_INDEX_TIMEOUT_SECS",
                    source,
                })?;
                if secs == 0 {
                    return Err(ConfigError::ZeroTimeout {
                        key: "SCANNER_GLOBAL_INDEX_TIMEOUT_SECS",
                    });
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_GLOBAL_INDEX_TIMEOUT,
        };

        Ok(Self {
            node_rpc_url,
            worker_threads,
            global_index_timeout,
        })
    }

    pub fn new(node_rpc_url: impl Into<String>) -> Self {
        Self {
            node_rpc_url: node_rpc_url.into(),
            worker_threads: None,
            global_index_timeout: DEFAULT_GLOBAL_INDEX_TIMEOUT,
        }
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = Some(workers);
        self
    }

    pub fn with_global_index_timeout(mut self, timeout: Duration) -> Self {
        self.global_index_timeout = timeout;
        self
    }

    pub fn node_rpc_url(&self) -> &str {
        &self.node_rpc_url
    }

    /// Configured worker count, or the available parallelism. Never below
    /// [`MIN_WORKER_THREADS`].
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(default_worker_threads)
            .max(MIN_WORKER_THREADS)
    }

    pub fn global_index_timeout(&self) -> Duration {
        self.global_index_timeout
    }
}

pub fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(MIN_WORKER_THREADS)
        .max(MIN_WORKER_THREADS)
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("CN_TRANSFERS_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("`{key}` must be greater than zero")]
    ZeroTimeout { key: &'static str },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
