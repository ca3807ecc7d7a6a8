use async_trait::async_trait;
use cn_transfers_domain::config::ScannerConfig;
use cn_transfers_domain::model::hash_hex;
use monero::cryptonote::hash::Hash;
use thiserror::Error;
use tracing::debug;

mod types;

pub use types::{GetTransactionsRequest, GetTransactionsResponse, TransactionEntry};

const STATUS_OK: &str = "OK";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("node answered with status `{0}`")]
    Status(String),
    #[error("node does not know transaction {0}")]
    MissingTransaction(String),
    #[error("transaction {0} is still in the pool")]
    InPool(String),
    #[error("global output index {0} does not fit in 32 bits")]
    IndexOverflow(u64),
}

impl From<reqwest::Error> for NodeError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Node queries the consumer needs while scanning.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Global output index of every output of a confirmed transaction.
    async fn transaction_global_indices(&self, tx_hash: &Hash) -> Result<Vec<u32>, NodeError>;
}

/// Talks to a daemon's plain HTTP endpoints.
pub struct HttpNodeClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpNodeClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder().build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn from_config(config: &ScannerConfig) -> Result<Self, NodeError> {
        Self::new(config.node_rpc_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn transaction_global_indices(&self, tx_hash: &Hash) -> Result<Vec<u32>, NodeError> {
        let txid = hash_hex(tx_hash);
        let request = GetTransactionsRequest {
            txs_hashes: vec![txid.clone()],
            decode_as_json: false,
        };

        let response: GetTransactionsResponse = self
            .http
            .post(format!("{}/get_transactions", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(txid = %txid, "fetched global output indices");
        global_indices_from_response(&txid, response)
    }
}

fn global_indices_from_response(
    txid: &str,
    response: GetTransactionsResponse,
) -> Result<Vec<u32>, NodeError> {
    if response.status != STATUS_OK {
        return Err(NodeError::Status(response.status));
    }

    let entry = response
        .txs
        .into_iter()
        .find(|entry| entry.tx_hash.eq_ignore_ascii_case(txid))
        .ok_or_else(|| NodeError::MissingTransaction(txid.to_string()))?;
    if entry.in_pool {
        return Err(NodeError::InPool(txid.to_string()));
    }

    entry
        .output_indices
        .unwrap_or_default()
        .into_iter()
        .map(|index| u32::try_from(index).map_err(|_| NodeError::IndexOverflow(index)))
        .collect()
}
