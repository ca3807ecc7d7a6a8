//! Per-transaction preprocessing: output matching, global index lookup and
//! conversion of matches into ownership records.

use std::collections::{HashMap, HashSet};

use cn_transfers_domain::crypto::{generate_key_image, KeyDerivation};
use cn_transfers_domain::matcher::{find_owned_outputs, OwnedOutput};
use cn_transfers_domain::model::{
    hash_hex, AccountKeys, KeyImage, OutputDetails, OutputTarget, Transaction, TransactionBlockInfo,
    TransactionOutputInformation, UNCONFIRMED_GLOBAL_OUTPUT_INDEX,
};
use cn_transfers_domain::services::telemetry::DUPLICATE_OUTPUT_KEYS_TOTAL;
use cn_transfers_domain::services::{DuplicateOutputKey, OutputKeyLedger};
use metrics::counter;
use monero::util::key::{PrivateKey, PublicKey};
use tracing::error;

use crate::error::ConsumerError;
use crate::resolver::{GlobalIndexResolver, StopSignal};

/// Keys the matcher needs, detached from the registry so worker threads can
/// share it read-only.
#[derive(Debug, Clone)]
pub struct ScanContext {
    view_secret: PrivateKey,
    spend_keys: HashSet<PublicKey>,
    accounts: HashMap<PublicKey, AccountKeys>,
}

impl ScanContext {
    pub fn new(view_secret: PrivateKey, accounts: impl IntoIterator<Item = AccountKeys>) -> Self {
        let accounts: HashMap<PublicKey, AccountKeys> = accounts
            .into_iter()
            .map(|keys| (*keys.spend_public_key(), keys))
            .collect();
        Self {
            view_secret,
            spend_keys: accounts.keys().copied().collect(),
            accounts,
        }
    }

    pub fn view_secret(&self) -> &PrivateKey {
        &self.view_secret
    }

    pub fn spend_keys(&self) -> &HashSet<PublicKey> {
        &self.spend_keys
    }

    pub fn account(&self, spend_key: &PublicKey) -> Option<&AccountKeys> {
        self.accounts.get(spend_key)
    }
}

/// Matches of one transaction, ready to be applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessInfo {
    /// Filled only for confirmed transactions with at least one match.
    pub global_indices: Vec<u32>,
    pub outputs: HashMap<PublicKey, Vec<TransactionOutputInformation>>,
}

impl PreprocessInfo {
    pub fn transfers_for(&self, spend_key: &PublicKey) -> &[TransactionOutputInformation] {
        self.outputs.get(spend_key).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub fn preprocess_outputs(
    context: &ScanContext,
    block: &TransactionBlockInfo,
    tx: &Transaction,
    resolver: &GlobalIndexResolver,
    stop: &StopSignal,
) -> Result<PreprocessInfo, ConsumerError> {
    let owned = find_owned_outputs(tx, context.view_secret(), context.spend_keys());
    let mut info = PreprocessInfo::default();
    let Some(derivation) = owned.derivation().copied() else {
        return Ok(info);
    };
    if owned.is_empty() {
        return Ok(info);
    }

    if !block.is_unconfirmed() {
        info.global_indices = resolver.resolve(&tx.hash, stop)?;
    }

    for (spend_key, matches) in owned.iter() {
        let Some(account) = context.account(spend_key) else {
            continue;
        };
        let transfers = create_transfers(
            account,
            block,
            tx,
            matches,
            &info.global_indices,
            &derivation,
        )?;
        if !transfers.is_empty() {
            info.outputs.insert(*spend_key, transfers);
        }
    }

    Ok(info)
}

/// Turns matched positions into ownership records.
pub fn create_transfers(
    account: &AccountKeys,
    block: &TransactionBlockInfo,
    tx: &Transaction,
    matches: &[OwnedOutput],
    global_indices: &[u32],
    derivation: &KeyDerivation,
) -> Result<Vec<TransactionOutputInformation>, ConsumerError> {
    let tx_public_key = match tx.public_key {
        Some(key) => key,
        None => return Ok(Vec::new()),
    };
    let mut transfers = Vec::with_capacity(matches.len());

    for owned in matches {
        let position = owned.output_index as usize;
        let output = tx
            .outputs
            .get(position)
            .ok_or_else(|| ConsumerError::OutputIndexOutOfRange {
                txid: hash_hex(&tx.hash),
                index: owned.output_index,
                count: tx.output_count(),
            })?;

        let global_output_index = if block.is_unconfirmed() {
            UNCONFIRMED_GLOBAL_OUTPUT_INDEX
        } else {
            global_indices.get(position).copied().ok_or_else(|| {
                ConsumerError::MissingGlobalIndex {
                    txid: hash_hex(&tx.hash),
                    index: owned.output_index,
                    available: global_indices.len(),
                }
            })?
        };

        let details = match &output.target {
            OutputTarget::Key(output_key) => OutputDetails::Key {
                output_key: *output_key,
                key_image: key_image_for(account, derivation, owned.key_index, output_key),
            },
            OutputTarget::Multisignature {
                required_signatures,
                ..
            } => OutputDetails::Multisignature {
                required_signatures: *required_signatures,
            },
            OutputTarget::Unsupported => continue,
        };

        transfers.push(TransactionOutputInformation {
            transaction_public_key: tx_public_key,
            output_in_transaction: owned.output_index,
            global_output_index,
            amount: output.amount,
            details,
        });
    }

    Ok(transfers)
}

/// Reserves the output keys of every record in `info` in `ledger`.
///
/// Must run in chain order: the first transaction to claim a key keeps it. A
/// key already claimed by another transaction (or repeated inside this one)
/// drops that record and every later one for the same account, and nothing
/// is committed for that account.
pub fn claim_transfers(info: &mut PreprocessInfo, tx: &Transaction, ledger: &OutputKeyLedger) {
    for transfers in info.outputs.values_mut() {
        let mut claim = ledger.claim(tx.hash);
        let mut accepted = 0;
        let mut rejected = None;
        for transfer in transfers.iter() {
            let reserved = match &transfer.details {
                OutputDetails::Key { output_key, .. } => {
                    claim.reserve(std::slice::from_ref(output_key))
                }
                OutputDetails::Multisignature { .. } => {
                    claim.reserve(multisignature_keys(tx, transfer.output_in_transaction))
                }
            };
            if let Err(duplicate) = reserved {
                rejected = Some((transfer.output_in_transaction, duplicate));
                break;
            }
            accepted += 1;
        }

        match rejected {
            Some((output_index, duplicate)) => {
                drop(claim);
                report_duplicate(tx, output_index, duplicate);
                transfers.truncate(accepted);
            }
            None => claim.commit(),
        }
    }
    info.outputs.retain(|_, transfers| !transfers.is_empty());
}

fn multisignature_keys(tx: &Transaction, output_index: u32) -> &[PublicKey] {
    match tx.outputs.get(output_index as usize).map(|output| &output.target) {
        Some(OutputTarget::Multisignature { keys, .. }) => keys,
        _ => &[],
    }
}

fn key_image_for(
    account: &AccountKeys,
    derivation: &KeyDerivation,
    key_index: u32,
    output_key: &PublicKey,
) -> Option<KeyImage> {
    let spend_secret = account.spend_secret_key.as_ref()?;
    let output_secret = derivation.derive_secret_key(u64::from(key_index), spend_secret)?;
    debug_assert_eq!(PublicKey::from_private_key(&output_secret), *output_key);
    generate_key_image(output_key, &output_secret)
}

fn report_duplicate(tx: &Transaction, output_index: u32, duplicate: DuplicateOutputKey) {
    let kind = match duplicate {
        DuplicateOutputKey::ClaimedElsewhere => "claimed_elsewhere",
        DuplicateOutputKey::RepeatedInTransaction => "repeated_in_transaction",
    };
    counter!(DUPLICATE_OUTPUT_KEYS_TOTAL, "kind" => kind).increment(1);
    error!(
        txid = %hash_hex(&tx.hash),
        output = output_index,
        %duplicate,
        "suspicious transaction reuses an output key, dropping its remaining outputs"
    );
}
