use serde::{Deserialize, Serialize};

/// Body of the daemon's `/get_transactions` endpoint.
#[derive(Debug, Serialize)]
pub struct GetTransactionsRequest {
    pub txs_hashes: Vec<String>,
    pub decode_as_json: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct GetTransactionsResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub txs: Vec<TransactionEntry>,
    #[serde(default)]
    pub missed_tx: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionEntry {
    pub tx_hash: String,
    #[serde(default)]
    pub in_pool: bool,
    #[serde(default)]
    pub output_indices: Option<Vec<u64>>,
}
