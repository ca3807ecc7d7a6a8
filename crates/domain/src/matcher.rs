//! Detects which outputs of a transaction pay one of the tracked spend keys.

use std::collections::{HashMap, HashSet};

use monero::util::key::{PrivateKey, PublicKey};

use crate::crypto::{generate_key_derivation, KeyDerivation};
use crate::model::{OutputTarget, Transaction};

/// One matched output position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedOutput {
    /// Position of the output inside the transaction.
    pub output_index: u32,
    /// Running key index the match was derived with.
    pub key_index: u32,
}

/// Matches of one transaction, grouped by the spend key they pay.
#[derive(Debug, Default)]
pub struct OwnedOutputs {
    derivation: Option<KeyDerivation>,
    by_spend_key: HashMap<PublicKey, Vec<OwnedOutput>>,
}

impl OwnedOutputs {
    pub fn is_empty(&self) -> bool {
        self.by_spend_key.is_empty()
    }

    pub fn derivation(&self) -> Option<&KeyDerivation> {
        self.derivation.as_ref()
    }

    pub fn get(&self, spend_key: &PublicKey) -> Option<&[OwnedOutput]> {
        self.by_spend_key.get(spend_key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PublicKey, &[OwnedOutput])> {
        self.by_spend_key
            .iter()
            .map(|(key, outputs)| (key, outputs.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.by_spend_key.values().map(Vec::len).sum()
    }
}

/// Scans every output of `tx` against `spend_keys`.
///
/// Key outputs consume one key index each; multisignature outputs consume one
/// per constituent key. A transaction without a usable public key yields no
/// matches.
pub fn find_owned_outputs(
    tx: &Transaction,
    view_secret: &PrivateKey,
    spend_keys: &HashSet<PublicKey>,
) -> OwnedOutputs {
    let Some(tx_public_key) = tx.public_key.as_ref() else {
        return OwnedOutputs::default();
    };
    let Some(derivation) = generate_key_derivation(tx_public_key, view_secret) else {
        return OwnedOutputs::default();
    };

    let mut owned = OwnedOutputs {
        derivation: Some(derivation),
        by_spend_key: HashMap::new(),
    };
    let mut key_index = 0u32;

    for (output_index, output) in tx.outputs.iter().enumerate() {
        let output_index = output_index as u32;
        match &output.target {
            OutputTarget::Key(key) => {
                check_output_key(&derivation, key, key_index, output_index, spend_keys, &mut owned);
                key_index += 1;
            }
            OutputTarget::Multisignature { keys, .. } => {
                for key in keys {
                    check_output_key(
                        &derivation,
                        key,
                        key_index,
                        output_index,
                        spend_keys,
                        &mut owned,
                    );
                    key_index += 1;
                }
            }
            OutputTarget::Unsupported => {}
        }
    }

    owned
}

fn check_output_key(
    derivation: &KeyDerivation,
    key: &PublicKey,
    key_index: u32,
    output_index: u32,
    spend_keys: &HashSet<PublicKey>,
    owned: &mut OwnedOutputs,
) {
    let Some(spend_key) = derivation.underive_public_key(u64::from(key_index), key) else {
        return;
    };
    if spend_keys.contains(&spend_key) {
        owned.by_spend_key.entry(spend_key).or_default().push(OwnedOutput {
            output_index,
            key_index,
        });
    }
}
