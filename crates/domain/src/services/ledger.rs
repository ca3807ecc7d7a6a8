use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use monero::cryptonote::hash::Hash;
use monero::util::key::PublicKey;
use thiserror::Error;

/// Why a key could not be reserved for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DuplicateOutputKey {
    #[error("output key was already claimed by another transaction")]
    ClaimedElsewhere,
    #[error("output key appears more than once in the transaction")]
    RepeatedInTransaction,
}

#[derive(Debug, Default)]
struct LedgerState {
    transactions: HashSet<Hash>,
    output_keys: HashSet<PublicKey>,
}

/// Remembers which transactions have been processed and which output keys
/// they claimed, so that a later transaction reusing an output key is caught.
///
/// Share one ledger (via `Arc`) between consumers that must cross-check each
/// other; otherwise give each consumer its own.
#[derive(Debug, Default)]
pub struct OutputKeyLedger {
    inner: Mutex<LedgerState>,
}

impl OutputKeyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a claim for `tx_hash`. The ledger stays locked until the claim
    /// is committed or dropped.
    pub fn claim(&self, tx_hash: Hash) -> OutputKeyClaim<'_> {
        let state = self.lock();
        let already_processed = state.transactions.contains(&tx_hash);
        OutputKeyClaim {
            state,
            tx_hash,
            already_processed,
            pending: Vec::new(),
        }
    }

    pub fn is_transaction_known(&self, tx_hash: &Hash) -> bool {
        self.lock().transactions.contains(tx_hash)
    }

    pub fn is_key_claimed(&self, key: &PublicKey) -> bool {
        self.lock().output_keys.contains(key)
    }

    pub fn claimed_key_count(&self) -> usize {
        self.lock().output_keys.len()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-flight reservation of output keys for one transaction.
pub struct OutputKeyClaim<'a> {
    state: MutexGuard<'a, LedgerState>,
    tx_hash: Hash,
    already_processed: bool,
    pending: Vec<PublicKey>,
}

impl OutputKeyClaim<'_> {
    pub fn tx_hash(&self) -> &Hash {
        &self.tx_hash
    }

    /// Reserves all keys of one output. Either every key is reserved or none
    /// is. Transactions that were processed before skip the check.
    pub fn reserve(&mut self, keys: &[PublicKey]) -> Result<(), DuplicateOutputKey> {
        if self.already_processed {
            return Ok(());
        }

        let mut staged: Vec<PublicKey> = Vec::with_capacity(keys.len());
        for key in keys {
            if self.state.output_keys.contains(key) {
                return Err(DuplicateOutputKey::ClaimedElsewhere);
            }
            if self.pending.contains(key) || staged.contains(key) {
                return Err(DuplicateOutputKey::RepeatedInTransaction);
            }
            staged.push(*key);
        }
        self.pending.extend(staged);
        Ok(())
    }

    /// Records the transaction and every reserved key.
    pub fn commit(mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.state.transactions.insert(self.tx_hash);
        self.state.output_keys.extend(pending);
    }
}
