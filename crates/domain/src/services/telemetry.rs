use std::{env, net::SocketAddr, sync::Arc};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

/// Block batches handed to the consumer, labelled `result=ok|error`.
pub const BATCHES_TOTAL: &str = "transfers_batches_total";
/// Matched transactions per applied batch.
pub const BATCH_TRANSACTIONS: &str = "transfers_batch_transactions";
/// Outputs dropped for reusing a claimed key, labelled by `kind`.
pub const DUPLICATE_OUTPUT_KEYS_TOTAL: &str = "transfers_duplicate_output_keys_total";
/// Global index lookups, labelled by `result` (`ok` or the error kind).
pub const GLOBAL_INDEX_REQUESTS_TOTAL: &str = "transfers_global_index_requests_total";
/// Size of the consumer's known pool set.
pub const KNOWN_POOL_TRANSACTIONS: &str = "transfers_known_pool_transactions";

/// Scanner observability options, read per binary prefix.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER` (default `info`) and the optional
    /// `<PREFIX>_METRICS_ADDRESS`.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let upper = prefix.trim().to_ascii_uppercase();
        let log_key = format!("{}_LOG_FILTER", upper);
        let metrics_key = format!("{}_METRICS_ADDRESS", upper);

        let log_filter = env::var(log_key).unwrap_or_else(|_| "info".to_string());
        let metrics_address = env::var(metrics_key).ok().and_then(|value| {
            if value.trim().is_empty() {
                None
            } else {
                Some(value)
            }
        });

        Self {
            log_filter,
            metrics_address,
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Handle on the installed Prometheus recorder.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
}

impl TelemetryGuard {
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }
}

/// Installs the tracing subscriber and the Prometheus recorder once per
/// process and describes the scanner metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_metrics(config)?;

    Ok(TelemetryGuard { metrics })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let mut builder = PrometheusBuilder::new();
            if let Some(addr) = config.metrics_address() {
                let socket: SocketAddr =
                    addr.parse().map_err(|err: std::net::AddrParseError| {
                        TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
                    })?;
                builder = builder.with_http_listener(socket);
            }

            let handle = builder
                .install_recorder()
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            describe_scanner_metrics();
            Ok(Arc::new(handle))
        })
        .cloned()
}

fn describe_scanner_metrics() {
    describe_counter!(BATCHES_TOTAL, "Block batches handed to the transfers consumer.");
    describe_histogram!(BATCH_TRANSACTIONS, "Matched transactions per applied block batch.");
    describe_counter!(
        DUPLICATE_OUTPUT_KEYS_TOTAL,
        "Outputs dropped because their key was already claimed."
    );
    describe_counter!(GLOBAL_INDEX_REQUESTS_TOTAL, "Global output index lookups sent to the node.");
    describe_gauge!(KNOWN_POOL_TRANSACTIONS, "Unconfirmed transactions the consumer tracks.");
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}
