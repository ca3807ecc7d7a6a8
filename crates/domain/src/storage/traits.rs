use monero::cryptonote::hash::Hash;
use thiserror::Error;

use crate::model::{
    hash_hex, AccountSubscription, Transaction, TransactionBlockInfo, TransactionInformation,
    TransactionOutputInformation,
};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("transaction {0} is already stored")]
    DuplicateTransaction(String),
    #[error("transaction {0} is not stored")]
    UnknownTransaction(String),
    #[error("transaction {0} is already confirmed")]
    AlreadyConfirmed(String),
    #[error("no global index for output {output} of transaction {txid}")]
    MissingGlobalIndex { txid: String, output: u32 },
    #[error("amounts of transaction {0} overflow u64")]
    AmountOverflow(String),
}

impl StorageError {
    pub fn duplicate(hash: &Hash) -> Self {
        Self::DuplicateTransaction(hash_hex(hash))
    }

    pub fn unknown(hash: &Hash) -> Self {
        Self::UnknownTransaction(hash_hex(hash))
    }
}

/// Per-account store of owned outputs and the transactions that touch them.
pub trait TransfersContainer: Send {
    fn unconfirmed_transaction_hashes(&self) -> Vec<Hash>;

    fn transaction_info(&self, hash: &Hash) -> Option<TransactionInformation>;

    fn transaction_transfers(&self, hash: &Hash) -> Vec<TransactionOutputInformation>;

    /// Stores `tx` if it pays or spends this account. Returns whether it was
    /// stored.
    fn add_transaction(
        &mut self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        transfers: &[TransactionOutputInformation],
    ) -> StorageResult<bool>;

    /// Moves a pool transaction into `block`, filling in global indices.
    fn mark_transaction_confirmed(
        &mut self,
        block: &TransactionBlockInfo,
        hash: &Hash,
        global_indices: &[u32],
    ) -> StorageResult<()>;

    /// Returns `false` if the hash is unknown or already confirmed.
    fn delete_unconfirmed_transaction(&mut self, hash: &Hash) -> bool;

    fn mark_transaction_safe(&mut self, hash: &Hash);

    /// Returns `false` if `height` is below the known height.
    fn advance_height(&mut self, height: u32) -> bool;

    fn known_height(&self) -> u32;

    /// Forgets everything confirmed at `height` or above and returns the
    /// removed transaction hashes.
    fn detach(&mut self, height: u32) -> Vec<Hash>;
}

/// Builds the container a new subscription will own.
pub trait ContainerFactory: Send {
    fn create(&self, subscription: &AccountSubscription) -> Box<dyn TransfersContainer>;
}

impl<F> ContainerFactory for F
where
    F: Fn(&AccountSubscription) -> Box<dyn TransfersContainer> + Send,
{
    fn create(&self, subscription: &AccountSubscription) -> Box<dyn TransfersContainer> {
        self(subscription)
    }
}
