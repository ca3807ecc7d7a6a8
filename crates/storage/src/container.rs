use std::collections::HashMap;

use cn_transfers_domain::model::{
    hash_hex, KeyImage, OutputDetails, Transaction, TransactionBlockInfo, TransactionInformation,
    TransactionInput, TransactionOutputInformation, UNCONFIRMED_GLOBAL_OUTPUT_INDEX,
};
use cn_transfers_domain::storage::{StorageError, StorageResult, TransfersContainer};
use monero::cryptonote::hash::Hash;
use tracing::debug;

/// How an owned output is referenced by the inputs that spend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SpendTag {
    KeyImage(KeyImage),
    Multisignature { amount: u64, global_output_index: u32 },
}

#[derive(Debug, Clone)]
struct StoredTransaction {
    info: TransactionInformation,
    transfers: Vec<TransactionOutputInformation>,
    spends: Vec<SpendTag>,
    safe: bool,
    // Insertion order, used to report detached hashes deterministically.
    sequence: u64,
}

/// In-memory [`TransfersContainer`] for one account.
///
/// A transaction is accepted when it pays the account or spends one of the
/// account's stored outputs. Key outputs are spent by key image (so only
/// accounts carrying a spend secret ever see spends); multisignature outputs
/// are spent by amount and global index once confirmed.
#[derive(Debug, Default)]
pub struct MemoryTransfersContainer {
    transactions: HashMap<Hash, StoredTransaction>,
    owned: HashMap<SpendTag, Hash>,
    spent: HashMap<SpendTag, Hash>,
    known_height: u32,
    next_sequence: u64,
}

impl MemoryTransfersContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_transaction_safe(&self, hash: &Hash) -> bool {
        self.transactions.get(hash).is_some_and(|stored| stored.safe)
    }

    /// Transaction that spent the output with `key_image`, if any.
    pub fn spending_transaction(&self, key_image: &KeyImage) -> Option<Hash> {
        self.spent.get(&SpendTag::KeyImage(*key_image)).copied()
    }

    /// Every stored output that no stored transaction spends.
    pub fn unspent_outputs(&self) -> Vec<TransactionOutputInformation> {
        let spent = &self.spent;
        let mut outputs: Vec<(u64, TransactionOutputInformation)> = self
            .transactions
            .values()
            .flat_map(|stored| {
                stored
                    .transfers
                    .iter()
                    .filter(move |transfer| {
                        spend_tag(transfer).map_or(true, |tag| !spent.contains_key(&tag))
                    })
                    .map(move |transfer| (stored.sequence, *transfer))
            })
            .collect();
        outputs.sort_by_key(|(sequence, transfer)| (*sequence, transfer.output_in_transaction));
        outputs.into_iter().map(|(_, transfer)| transfer).collect()
    }

    fn spends_of(&self, tx: &Transaction) -> Vec<SpendTag> {
        tx.inputs
            .iter()
            .filter_map(|input| match input {
                TransactionInput::Key { key_image, .. } => Some(SpendTag::KeyImage(*key_image)),
                TransactionInput::Multisignature {
                    amount,
                    output_index,
                    ..
                } => Some(SpendTag::Multisignature {
                    amount: *amount,
                    global_output_index: *output_index,
                }),
                TransactionInput::Generate { .. } => None,
            })
            .filter(|tag| self.owned.contains_key(tag) && !self.spent.contains_key(tag))
            .collect()
    }

    fn index_outputs(&mut self, hash: Hash) {
        let Some(stored) = self.transactions.get(&hash) else {
            return;
        };
        let tags: Vec<SpendTag> = stored.transfers.iter().filter_map(spend_tag).collect();
        for tag in tags {
            self.owned.insert(tag, hash);
        }
    }

    fn remove_transaction(&mut self, hash: &Hash) -> Option<StoredTransaction> {
        let stored = self.transactions.remove(hash)?;
        for tag in &stored.spends {
            if self.spent.get(tag) == Some(hash) {
                self.spent.remove(tag);
            }
        }
        for tag in stored.transfers.iter().filter_map(spend_tag) {
            if self.owned.get(&tag) == Some(hash) {
                self.owned.remove(&tag);
            }
        }
        Some(stored)
    }
}

fn spend_tag(transfer: &TransactionOutputInformation) -> Option<SpendTag> {
    match transfer.details {
        OutputDetails::Key { key_image, .. } => key_image.map(SpendTag::KeyImage),
        OutputDetails::Multisignature { .. } => {
            if transfer.global_output_index == UNCONFIRMED_GLOBAL_OUTPUT_INDEX {
                None
            } else {
                Some(SpendTag::Multisignature {
                    amount: transfer.amount,
                    global_output_index: transfer.global_output_index,
                })
            }
        }
    }
}

impl TransfersContainer for MemoryTransfersContainer {
    fn unconfirmed_transaction_hashes(&self) -> Vec<Hash> {
        let mut pending: Vec<&StoredTransaction> = self
            .transactions
            .values()
            .filter(|stored| stored.info.is_unconfirmed())
            .collect();
        pending.sort_by_key(|stored| stored.sequence);
        pending
            .into_iter()
            .map(|stored| stored.info.transaction_hash)
            .collect()
    }

    fn transaction_info(&self, hash: &Hash) -> Option<TransactionInformation> {
        self.transactions.get(hash).map(|stored| stored.info)
    }

    fn transaction_transfers(&self, hash: &Hash) -> Vec<TransactionOutputInformation> {
        self.transactions
            .get(hash)
            .map(|stored| stored.transfers.clone())
            .unwrap_or_default()
    }

    fn add_transaction(
        &mut self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        transfers: &[TransactionOutputInformation],
    ) -> StorageResult<bool> {
        if self.transactions.contains_key(&tx.hash) {
            return Err(StorageError::duplicate(&tx.hash));
        }
        if !block.is_unconfirmed() {
            if let Some(missing) = transfers
                .iter()
                .find(|transfer| transfer.global_output_index == UNCONFIRMED_GLOBAL_OUTPUT_INDEX)
            {
                return Err(StorageError::MissingGlobalIndex {
                    txid: hash_hex(&tx.hash),
                    output: missing.output_in_transaction,
                });
            }
        }

        let spends = self.spends_of(tx);
        if transfers.is_empty() && spends.is_empty() {
            return Ok(false);
        }

        let total_amount_in = checked_total(
            tx,
            tx.inputs.iter().map(|input| match input {
                TransactionInput::Key { amount, .. }
                | TransactionInput::Multisignature { amount, .. } => *amount,
                TransactionInput::Generate { .. } => 0,
            }),
        )?;
        let total_amount_out = checked_total(tx, tx.outputs.iter().map(|output| output.amount))?;

        for tag in &spends {
            self.spent.insert(*tag, tx.hash);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.transactions.insert(
            tx.hash,
            StoredTransaction {
                info: TransactionInformation {
                    transaction_hash: tx.hash,
                    public_key: tx.public_key,
                    block_height: block.height,
                    timestamp: block.timestamp,
                    unlock_time: tx.unlock_time,
                    total_amount_in,
                    total_amount_out,
                },
                transfers: transfers.to_vec(),
                spends,
                safe: false,
                sequence,
            },
        );
        self.index_outputs(tx.hash);

        debug!(
            txid = %hash_hex(&tx.hash),
            height = block.height,
            transfers = transfers.len(),
            "stored transaction"
        );
        Ok(true)
    }

    fn mark_transaction_confirmed(
        &mut self,
        block: &TransactionBlockInfo,
        hash: &Hash,
        global_indices: &[u32],
    ) -> StorageResult<()> {
        let stored = self
            .transactions
            .get_mut(hash)
            .ok_or_else(|| StorageError::unknown(hash))?;
        if !stored.info.is_unconfirmed() {
            return Err(StorageError::AlreadyConfirmed(hash_hex(hash)));
        }

        let mut resolved = Vec::with_capacity(stored.transfers.len());
        for transfer in &stored.transfers {
            let index = global_indices
                .get(transfer.output_in_transaction as usize)
                .copied()
                .ok_or_else(|| StorageError::MissingGlobalIndex {
                    txid: hash_hex(hash),
                    output: transfer.output_in_transaction,
                })?;
            resolved.push(index);
        }

        for (transfer, index) in stored.transfers.iter_mut().zip(resolved) {
            transfer.global_output_index = index;
        }
        stored.info.block_height = block.height;
        stored.info.timestamp = block.timestamp;
        self.index_outputs(*hash);
        Ok(())
    }

    fn delete_unconfirmed_transaction(&mut self, hash: &Hash) -> bool {
        match self.transactions.get(hash) {
            Some(stored) if stored.info.is_unconfirmed() => {
                self.remove_transaction(hash);
                true
            }
            _ => false,
        }
    }

    fn mark_transaction_safe(&mut self, hash: &Hash) {
        if let Some(stored) = self.transactions.get_mut(hash) {
            stored.safe = true;
        }
    }

    fn advance_height(&mut self, height: u32) -> bool {
        if height < self.known_height {
            return false;
        }
        self.known_height = height;
        true
    }

    fn known_height(&self) -> u32 {
        self.known_height
    }

    fn detach(&mut self, height: u32) -> Vec<Hash> {
        let mut detached: Vec<(u32, u64, Hash)> = self
            .transactions
            .values()
            .filter(|stored| !stored.info.is_unconfirmed() && stored.info.block_height >= height)
            .map(|stored| (stored.info.block_height, stored.sequence, stored.info.transaction_hash))
            .collect();
        // Newest first so spends are reverted before the outputs they spend.
        detached.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

        let removed: Vec<Hash> = detached
            .into_iter()
            .filter_map(|(_, _, hash)| self.remove_transaction(&hash).map(|_| hash))
            .collect();
        if height <= self.known_height {
            self.known_height = height.saturating_sub(1);
        }
        removed
    }
}

fn checked_total(tx: &Transaction, amounts: impl Iterator<Item = u64>) -> StorageResult<u64> {
    amounts
        .try_fold(0u64, u64::checked_add)
        .ok_or_else(|| StorageError::AmountOverflow(hash_hex(&tx.hash)))
}
