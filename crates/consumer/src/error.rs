use std::time::Duration;

use cn_transfers_domain::storage::StorageError;
use thiserror::Error;

use crate::rpc::NodeError;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("output {index} is out of range for transaction {txid} with {count} outputs")]
    OutputIndexOutOfRange {
        txid: String,
        index: u32,
        count: usize,
    },
    #[error("transaction {txid} has {available} global indices, output {index} has none")]
    MissingGlobalIndex {
        txid: String,
        index: u32,
        available: usize,
    },
    #[error("node error: {0}")]
    Node(#[from] NodeError),
    #[error("global index request for {txid} timed out after {timeout:?}")]
    Timeout { txid: String, timeout: Duration },
    #[error("block processing was cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("transaction {txid} is stored at height {stored} but arrived at height {incoming}")]
    HeightMismatch {
        txid: String,
        stored: u32,
        incoming: u32,
    },
    #[error("subscription view key does not match the consumer view key")]
    ViewKeyMismatch,
}

impl ConsumerError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutputIndexOutOfRange { .. } => "output_index_out_of_range",
            Self::MissingGlobalIndex { .. } => "missing_global_index",
            Self::Node(_) => "node",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Storage(_) => "storage",
            Self::HeightMismatch { .. } => "height_mismatch",
            Self::ViewKeyMismatch => "view_key_mismatch",
        }
    }
}
