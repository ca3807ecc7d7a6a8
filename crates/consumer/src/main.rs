//! Resolves global output indices for the transaction hashes
//! given on the command line against the configured daemon.

use std::io;
use std::sync::Arc;

use cn_transfers_consumer::{
    ConsumerError, GlobalIndexResolver, HttpNodeClient, NodeError, StopSignal,
};
use cn_transfers_domain::config::{ConfigError, ScannerConfig};
use cn_transfers_domain::model::hash_hex;
use cn_transfers_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
use monero::cryptonote::hash::Hash;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
enum LookupError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("node client error: {0}")]
    Node(#[from] NodeError),
    #[error("runtime error: {0}")]
    Runtime(#[from] io::Error),
    #[error("invalid transaction hash `{0}`")]
    InvalidHash(String),
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

fn main() -> io::Result<()> {
    if let Err(err) = run() {
        eprintln!("[indices] failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

fn run() -> Result<(), LookupError> {
    let config = ScannerConfig::load_from_env()?;
    let _telemetry = init_telemetry(&TelemetryConfig::from_env("SCANNER"))?;
    let hashes = std::env::args()
        .skip(1)
        .map(|arg| parse_hash(&arg))
        .collect::<Result<Vec<_>, _>>()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let node = HttpNodeClient::from_config(&config)?;
    info!(node = node.base_url(), count = hashes.len(), "looking up global indices");
    let resolver = GlobalIndexResolver::new(
        Arc::new(node),
        runtime.handle().clone(),
        config.global_index_timeout(),
    );

    let stop = StopSignal::new();
    for tx_hash in &hashes {
        let indices = resolver.resolve(tx_hash, &stop)?;
        println!("{} {:?}", hash_hex(tx_hash), indices);
    }
    Ok(())
}

fn parse_hash(value: &str) -> Result<Hash, LookupError> {
    let bytes =
        hex::decode(value.trim()).map_err(|_| LookupError::InvalidHash(value.to_string()))?;
    if bytes.len() != 32 {
        return Err(LookupError::InvalidHash(value.to_string()));
    }
    Ok(Hash::from_slice(&bytes))
}
