//! Data structures shared by the consumer pipeline and transfer containers.

use std::fmt;

use hex::encode as hex_encode;
use monero::cryptonote::hash::Hash;
use monero::util::key::{KeyPair, PrivateKey, PublicKey, ViewPair};

/// Block height used for transactions that only live in the memory pool.
pub const UNCONFIRMED_TRANSACTION_HEIGHT: u32 = u32::MAX;

/// Global output index reported for outputs of unconfirmed transactions.
pub const UNCONFIRMED_GLOBAL_OUTPUT_INDEX: u32 = u32::MAX;

/// Lowercase hex rendering of a transaction or block hash for logs.
pub fn hash_hex(hash: &Hash) -> String {
    hex_encode(hash.as_bytes())
}

/// Lowercase hex rendering of a public key for logs.
pub fn key_hex(key: &PublicKey) -> String {
    hex_encode(key.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountPublicAddress {
    pub spend_public_key: PublicKey,
    pub view_public_key: PublicKey,
}

/// Keys of one tracked account. Tracking (view-only) accounts carry no spend
/// secret and therefore get no key images on their outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountKeys {
    pub address: AccountPublicAddress,
    pub spend_secret_key: Option<PrivateKey>,
    pub view_secret_key: PrivateKey,
}

impl AccountKeys {
    pub fn from_key_pair(pair: &KeyPair) -> Self {
        Self {
            address: AccountPublicAddress {
                spend_public_key: PublicKey::from_private_key(&pair.spend),
                view_public_key: PublicKey::from_private_key(&pair.view),
            },
            spend_secret_key: Some(pair.spend),
            view_secret_key: pair.view,
        }
    }

    pub fn tracking(pair: &ViewPair) -> Self {
        Self {
            address: AccountPublicAddress {
                spend_public_key: pair.spend,
                view_public_key: PublicKey::from_private_key(&pair.view),
            },
            spend_secret_key: None,
            view_secret_key: pair.view,
        }
    }

    pub fn spend_public_key(&self) -> &PublicKey {
        &self.address.spend_public_key
    }
}

/// Height/timestamp floor below which blocks are not scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizationStart {
    pub height: u64,
    pub timestamp: u64,
}

impl SynchronizationStart {
    /// Floor reported when nothing is tracked.
    pub const UNBOUNDED: Self = Self {
        height: u64::MAX,
        timestamp: u64::MAX,
    };

    pub fn new(height: u64, timestamp: u64) -> Self {
        Self { height, timestamp }
    }

    /// Component-wise minimum of two floors.
    pub fn min(self, other: Self) -> Self {
        Self {
            height: self.height.min(other.height),
            timestamp: self.timestamp.min(other.timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSubscription {
    pub keys: AccountKeys,
    pub sync_start: SynchronizationStart,
}

/// Where a transaction sits on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionBlockInfo {
    pub height: u32,
    pub timestamp: u64,
    pub transaction_index: u32,
}

impl TransactionBlockInfo {
    pub fn unconfirmed() -> Self {
        Self {
            height: UNCONFIRMED_TRANSACTION_HEIGHT,
            timestamp: 0,
            transaction_index: 0,
        }
    }

    pub fn is_unconfirmed(&self) -> bool {
        self.height == UNCONFIRMED_TRANSACTION_HEIGHT
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyImage(pub [u8; 32]);

impl KeyImage {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex_encode(self.0))
    }
}

impl fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyImage({})", hex_encode(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionInput {
    /// Coinbase input.
    Generate { height: u32 },
    Key {
        amount: u64,
        key_image: KeyImage,
        output_offsets: Vec<u32>,
    },
    Multisignature {
        amount: u64,
        signature_count: u32,
        /// Global index of the multisignature output being spent.
        output_index: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    Key,
    Multisignature,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Key(PublicKey),
    Multisignature {
        keys: Vec<PublicKey>,
        required_signatures: u32,
    },
    /// Script-like targets this wallet does not understand.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: OutputTarget,
}

impl TransactionOutput {
    pub fn output_type(&self) -> OutputType {
        match self.target {
            OutputTarget::Key(_) => OutputType::Key,
            OutputTarget::Multisignature { .. } => OutputType::Multisignature,
            OutputTarget::Unsupported => OutputType::Invalid,
        }
    }
}

/// Parsed transaction as delivered by the node layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: Hash,
    /// `None` when the extra field carries no (or a null) transaction key.
    pub public_key: Option<PublicKey>,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
}

impl Transaction {
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub timestamp: u64,
}

/// A block together with its parsed transactions. `block` is `None` when the
/// node only delivered the hash (e.g. a pruned or not yet downloaded body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteBlock {
    pub block_hash: Hash,
    pub block: Option<BlockHeader>,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDetails {
    Key {
        output_key: PublicKey,
        key_image: Option<KeyImage>,
    },
    Multisignature {
        required_signatures: u32,
    },
}

/// Ownership record for one matched output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOutputInformation {
    pub transaction_public_key: PublicKey,
    pub output_in_transaction: u32,
    pub global_output_index: u32,
    pub amount: u64,
    pub details: OutputDetails,
}

impl TransactionOutputInformation {
    pub fn output_type(&self) -> OutputType {
        match self.details {
            OutputDetails::Key { .. } => OutputType::Key,
            OutputDetails::Multisignature { .. } => OutputType::Multisignature,
        }
    }

    pub fn key_image(&self) -> Option<KeyImage> {
        match self.details {
            OutputDetails::Key { key_image, .. } => key_image,
            OutputDetails::Multisignature { .. } => None,
        }
    }
}

/// What a container remembers about a transaction it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionInformation {
    pub transaction_hash: Hash,
    pub public_key: Option<PublicKey>,
    pub block_height: u32,
    pub timestamp: u64,
    pub unlock_time: u64,
    pub total_amount_in: u64,
    pub total_amount_out: u64,
}

impl TransactionInformation {
    pub fn is_unconfirmed(&self) -> bool {
        self.block_height == UNCONFIRMED_TRANSACTION_HEIGHT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_start_min_is_component_wise() {
        let a = SynchronizationStart::new(10, 500);
        let b = SynchronizationStart::new(20, 100);
        assert_eq!(a.min(b), SynchronizationStart::new(10, 100));
        assert_eq!(SynchronizationStart::UNBOUNDED.min(a), a);
    }

    #[test]
    fn unconfirmed_block_info_uses_sentinel_height() {
        let info = TransactionBlockInfo::unconfirmed();
        assert!(info.is_unconfirmed());
        assert_eq!(info.height, UNCONFIRMED_TRANSACTION_HEIGHT);
        assert_eq!(info.timestamp, 0);
    }

    #[test]
    fn key_image_renders_as_hex() {
        let image = KeyImage([0xab; 32]);
        assert_eq!(image.to_string(), "ab".repeat(32));
    }
}
