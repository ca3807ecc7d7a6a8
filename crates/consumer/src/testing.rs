//! Shared fixtures for the consumer tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cn_transfers_domain::config::ScannerConfig;
use cn_transfers_domain::crypto::generate_key_derivation;
use cn_transfers_domain::matcher::find_owned_outputs;
use cn_transfers_domain::model::{
    hash_hex, AccountKeys, AccountPublicAddress, AccountSubscription, BlockHeader, CompleteBlock,
    OutputTarget, SynchronizationStart, Transaction, TransactionBlockInfo, TransactionOutput,
    TransactionOutputInformation,
};
use cn_transfers_domain::services::OutputKeyLedger;
use cn_transfers_storage::MemoryContainerFactory;
use curve25519_dalek::scalar::Scalar;
use monero::cryptonote::hash::Hash;
use monero::util::key::{KeyPair, PrivateKey, PublicKey};
use sha3::{Digest, Keccak256};
use tokio::runtime::Runtime;

use crate::consumer::TransfersConsumer;
use crate::error::ConsumerError;
use crate::observer::ConsumerObserver;
use crate::pipeline::create_transfers;
use crate::resolver::GlobalIndexResolver;
use crate::rpc::{NodeClient, NodeError};
use crate::subscription::SubscriptionObserver;

fn scalar_key(seed: u8, domain: u8) -> PrivateKey {
    let scalar = Scalar::from_bytes_mod_order(Keccak256::digest([seed, domain]).into());
    PrivateKey::from_slice(scalar.as_bytes()).expect("reduced scalar is a valid key")
}

pub fn hash(seed: u8) -> Hash {
    Hash::from_slice(&[seed; 32])
}

/// Full account whose view secret depends only on `view_seed`.
pub fn account(view_seed: u8, spend_seed: u8) -> AccountKeys {
    AccountKeys::from_key_pair(&KeyPair {
        view: scalar_key(view_seed, 0x01),
        spend: scalar_key(spend_seed, 0x02),
    })
}

pub fn subscription(keys: AccountKeys, height: u64, timestamp: u64) -> AccountSubscription {
    AccountSubscription {
        keys,
        sync_start: SynchronizationStart::new(height, timestamp),
    }
}

pub fn block_info(height: u32, transaction_index: u32) -> TransactionBlockInfo {
    TransactionBlockInfo {
        height,
        timestamp: 1_000 + u64::from(height),
        transaction_index,
    }
}

/// Transaction with hash `hash(tx_seed)` paying each recipient one key
/// output, derived the way a sender would.
pub fn pay(tx_seed: u8, outputs: &[(&AccountKeys, u64)]) -> Transaction {
    let tx_secret = scalar_key(tx_seed, 0x03);
    let outputs = outputs
        .iter()
        .enumerate()
        .map(|(index, (to, amount))| {
            let derivation = generate_key_derivation(&to.address.view_public_key, &tx_secret)
                .expect("valid recipient view key");
            let key = derivation
                .derive_public_key(index as u64, to.spend_public_key())
                .expect("valid recipient spend key");
            TransactionOutput {
                amount: *amount,
                target: OutputTarget::Key(key),
            }
        })
        .collect();

    Transaction {
        hash: hash(tx_seed),
        public_key: Some(PublicKey::from_private_key(&tx_secret)),
        unlock_time: 0,
        inputs: Vec::new(),
        outputs,
    }
}

pub fn complete_block(seed: u8, timestamp: u64, transactions: Vec<Transaction>) -> CompleteBlock {
    CompleteBlock {
        block_hash: Hash::from_slice(&Keccak256::digest([seed, 0xbb])),
        block: Some(BlockHeader { timestamp }),
        transactions,
    }
}

/// Records `keys` would get for `tx` at `block`, using the mock node's
/// global indices.
pub fn transfers_for(
    keys: &AccountKeys,
    tx: &Transaction,
    block: &TransactionBlockInfo,
) -> Vec<TransactionOutputInformation> {
    let tracked: HashSet<PublicKey> = [*keys.spend_public_key()].into();
    let owned = find_owned_outputs(tx, &keys.view_secret_key, &tracked);
    let Some(derivation) = owned.derivation() else {
        return Vec::new();
    };
    let matches = owned.get(keys.spend_public_key()).unwrap_or(&[]);
    let indices = if block.is_unconfirmed() {
        Vec::new()
    } else {
        MockNode::indices_for(&tx.hash)
    };
    create_transfers(keys, block, tx, matches, &indices, derivation).expect("transfers build")
}

pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("tokio runtime")
}

/// Node double. Answers with [`MockNode::indices_for`] unless told to fail,
/// stall or panic for a hash.
#[derive(Default)]
pub struct MockNode {
    delays: bool,
    failing: HashSet<Hash>,
    stalling: HashSet<Hash>,
    panicking: HashSet<Hash>,
    calls: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a per-hash delay of up to 7ms so requests finish out of order.
    pub fn with_delays(mut self) -> Self {
        self.delays = true;
        self
    }

    pub fn failing(mut self, tx_hash: Hash) -> Self {
        self.failing.insert(tx_hash);
        self
    }

    pub fn stalling(mut self, tx_hash: Hash) -> Self {
        self.stalling.insert(tx_hash);
        self
    }

    pub fn panicking(mut self, tx_hash: Hash) -> Self {
        self.panicking.insert(tx_hash);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn indices_for(tx_hash: &Hash) -> Vec<u32> {
        let base = u32::from(tx_hash.as_bytes()[0]) * 1_000;
        (0..16).map(|offset| base + offset).collect()
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn transaction_global_indices(&self, tx_hash: &Hash) -> Result<Vec<u32>, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delays {
            let millis = u64::from(tx_hash.as_bytes()[1].wrapping_mul(37) % 8);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        if self.stalling.contains(tx_hash) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.panicking.contains(tx_hash) {
            panic!("mock node asked to panic for {}", hash_hex(tx_hash));
        }
        if self.failing.contains(tx_hash) {
            return Err(NodeError::Status("BUSY".to_string()));
        }
        Ok(Self::indices_for(tx_hash))
    }
}

pub fn node_resolver(node: MockNode) -> (Runtime, Arc<MockNode>, GlobalIndexResolver) {
    let rt = runtime();
    let node = Arc::new(node);
    let resolver =
        GlobalIndexResolver::new(node.clone(), rt.handle().clone(), Duration::from_secs(5));
    (rt, node, resolver)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    BlocksAdded(Vec<Hash>),
    Detached(u32),
    Updated(Hash, Vec<AccountPublicAddress>),
    DeleteBegin(Hash),
    DeleteEnd(Hash),
}

#[derive(Default)]
pub struct RecordingConsumerObserver {
    events: Mutex<Vec<ConsumerEvent>>,
}

impl RecordingConsumerObserver {
    pub fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn detached_heights(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ConsumerEvent::Detached(height) => Some(height),
                _ => None,
            })
            .collect()
    }

    pub fn updated_hashes(&self) -> Vec<Hash> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ConsumerEvent::Updated(tx_hash, _) => Some(tx_hash),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ConsumerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ConsumerObserver for RecordingConsumerObserver {
    fn on_blocks_added(&self, block_hashes: &[Hash]) {
        self.push(ConsumerEvent::BlocksAdded(block_hashes.to_vec()));
    }

    fn on_blockchain_detach(&self, height: u32) {
        self.push(ConsumerEvent::Detached(height));
    }

    fn on_transaction_updated(&self, tx_hash: &Hash, addresses: &[AccountPublicAddress]) {
        let mut addresses = addresses.to_vec();
        addresses.sort_by_key(|address| address.spend_public_key.as_bytes().to_vec());
        self.push(ConsumerEvent::Updated(*tx_hash, addresses));
    }

    fn on_transaction_delete_begin(&self, tx_hash: &Hash) {
        self.push(ConsumerEvent::DeleteBegin(*tx_hash));
    }

    fn on_transaction_delete_end(&self, tx_hash: &Hash) {
        self.push(ConsumerEvent::DeleteEnd(*tx_hash));
    }
}

#[derive(Default)]
pub struct RecordingSubscriptionObserver {
    errors: Mutex<Vec<(AccountPublicAddress, u32, String)>>,
    updated: Mutex<Vec<Hash>>,
    deleted: Mutex<Vec<Hash>>,
}

impl RecordingSubscriptionObserver {
    /// Errors as `(address, height, ConsumerError::kind)`.
    pub fn errors(&self) -> Vec<(AccountPublicAddress, u32, String)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<Hash> {
        self.updated.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<Hash> {
        self.deleted.lock().unwrap().clone()
    }
}

impl SubscriptionObserver for RecordingSubscriptionObserver {
    fn on_error(&self, address: &AccountPublicAddress, height: u32, error: &ConsumerError) {
        self.errors
            .lock()
            .unwrap()
            .push((*address, height, error.kind().to_string()));
    }

    fn on_transaction_updated(&self, _address: &AccountPublicAddress, tx_hash: &Hash) {
        self.updated.lock().unwrap().push(*tx_hash);
    }

    fn on_transaction_deleted(&self, _address: &AccountPublicAddress, tx_hash: &Hash) {
        self.deleted.lock().unwrap().push(*tx_hash);
    }
}

/// Consumer over in-memory containers with a recording observer attached.
pub struct Fixture {
    pub consumer: TransfersConsumer,
    pub node: Arc<MockNode>,
    pub observer: Arc<RecordingConsumerObserver>,
    pub ledger: Arc<OutputKeyLedger>,
    _runtime: Runtime,
}

impl Fixture {
    pub fn new(node: MockNode, view_seed: u8) -> Self {
        Self::with_ledger(node, view_seed, Arc::new(OutputKeyLedger::new()))
    }

    pub fn with_ledger(node: MockNode, view_seed: u8, ledger: Arc<OutputKeyLedger>) -> Self {
        let runtime = runtime();
        let node = Arc::new(node);
        let config = ScannerConfig::new("http://127.0.0.1:18081")
            .with_worker_threads(4)
            .with_global_index_timeout(Duration::from_secs(5));
        let mut consumer = TransfersConsumer::new(
            &config,
            account(view_seed, 0).view_secret_key,
            node.clone(),
            runtime.handle().clone(),
            ledger.clone(),
            Box::new(MemoryContainerFactory),
        );
        let observer = Arc::new(RecordingConsumerObserver::default());
        consumer.add_observer(observer.clone());
        Self {
            consumer,
            node,
            observer,
            ledger,
            _runtime: runtime,
        }
    }

    /// Subscribes `keys` from height 0 and attaches a recording observer.
    pub fn subscribe(&mut self, keys: AccountKeys) -> Arc<RecordingSubscriptionObserver> {
        let observer = Arc::new(RecordingSubscriptionObserver::default());
        self.consumer
            .add_subscription(subscription(keys, 0, 0))
            .expect("subscription accepted")
            .add_observer(observer.clone());
        observer
    }
}
