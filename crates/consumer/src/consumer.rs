use std::collections::HashSet;
use std::sync::Arc;

use cn_transfers_domain::config::ScannerConfig;
use cn_transfers_domain::model::{
    hash_hex, AccountPublicAddress, AccountSubscription, CompleteBlock, SynchronizationStart,
    Transaction, TransactionBlockInfo, UNCONFIRMED_TRANSACTION_HEIGHT,
};
use cn_transfers_domain::services::telemetry::{BATCHES_TOTAL, KNOWN_POOL_TRANSACTIONS};
use cn_transfers_domain::services::OutputKeyLedger;
use cn_transfers_domain::storage::ContainerFactory;
use metrics::{counter, gauge};
use monero::cryptonote::hash::Hash;
use monero::util::key::PrivateKey;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::error::ConsumerError;
use crate::observer::{ConsumerObserver, ObserverManager};
use crate::pipeline::{claim_transfers, preprocess_outputs, PreprocessInfo};
use crate::registry::SubscriptionRegistry;
use crate::resolver::{GlobalIndexResolver, StopSignal};
use crate::rpc::{HttpNodeClient, NodeClient, NodeError};
use crate::subscription::TransfersSubscription;
use crate::worker::BatchScanner;

/// Scans blocks and pool transactions for outputs paying any subscribed
/// account and forwards them to each subscription's container.
///
/// All subscriptions share one view secret. Blocking calls into the node are
/// driven on `runtime`, so none of the methods may be called from inside an
/// async context.
pub struct TransfersConsumer {
    registry: SubscriptionRegistry,
    resolver: GlobalIndexResolver,
    ledger: Arc<OutputKeyLedger>,
    workers: usize,
    pool_txs: HashSet<Hash>,
    observers: ObserverManager<dyn ConsumerObserver>,
}

impl TransfersConsumer {
    pub fn new(
        config: &ScannerConfig,
        view_secret: PrivateKey,
        node: Arc<dyn NodeClient>,
        runtime: Handle,
        ledger: Arc<OutputKeyLedger>,
        factory: Box<dyn ContainerFactory>,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(view_secret, factory),
            resolver: GlobalIndexResolver::new(node, runtime, config.global_index_timeout()),
            ledger,
            workers: config.worker_threads(),
            pool_txs: HashSet::new(),
            observers: ObserverManager::new(),
        }
    }

    /// Builds a consumer that queries the daemon at `config.node_rpc_url()`.
    pub fn with_http_node(
        config: &ScannerConfig,
        view_secret: PrivateKey,
        runtime: Handle,
        ledger: Arc<OutputKeyLedger>,
        factory: Box<dyn ContainerFactory>,
    ) -> Result<Self, NodeError> {
        let node = HttpNodeClient::from_config(config)?;
        Ok(Self::new(
            config,
            view_secret,
            Arc::new(node),
            runtime,
            ledger,
            factory,
        ))
    }

    pub fn worker_threads(&self) -> usize {
        self.workers
    }

    pub fn ledger(&self) -> &Arc<OutputKeyLedger> {
        &self.ledger
    }

    pub fn add_subscription(
        &mut self,
        subscription: AccountSubscription,
    ) -> Result<&mut TransfersSubscription, ConsumerError> {
        self.registry.add_subscription(subscription)
    }

    /// Returns whether no subscription is left.
    pub fn remove_subscription(&mut self, address: &AccountPublicAddress) -> bool {
        self.registry.remove_subscription(address)
    }

    pub fn subscription(&self, address: &AccountPublicAddress) -> Option<&TransfersSubscription> {
        self.registry.subscription(address)
    }

    pub fn subscription_mut(
        &mut self,
        address: &AccountPublicAddress,
    ) -> Option<&mut TransfersSubscription> {
        self.registry.subscription_mut(address)
    }

    pub fn subscriptions(&self) -> Vec<AccountPublicAddress> {
        self.registry.subscriptions()
    }

    pub fn sync_start(&self) -> SynchronizationStart {
        self.registry.sync_start()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ConsumerObserver>) -> bool {
        self.observers.add(observer)
    }

    pub fn remove_observer(&mut self, observer: &Arc<dyn ConsumerObserver>) -> bool {
        self.observers.remove(observer)
    }

    /// Applies a batch of consecutive blocks starting at `start_height`.
    ///
    /// Returns `false` if preprocessing failed; nothing is applied then and
    /// every subscription is told through its `on_error`.
    pub fn on_new_blocks(&mut self, blocks: &[CompleteBlock], start_height: u32) -> bool {
        if blocks.is_empty() {
            return true;
        }

        let context = self.registry.scan_context();
        let scanner = BatchScanner {
            context: &context,
            resolver: &self.resolver,
            sync_start: self.registry.sync_start(),
            workers: self.workers,
        };
        let preprocessed = match scanner.preprocess_blocks(blocks, start_height) {
            Ok(preprocessed) => preprocessed,
            Err(err) => {
                error!(start_height, count = blocks.len(), %err, "failed to process blocks");
                counter!(BATCHES_TOTAL, "result" => "error").increment(1);
                for subscription in self.registry.iter_mut() {
                    subscription.on_error(&err, start_height);
                }
                return false;
            }
        };

        let block_hashes: Vec<Hash> = blocks.iter().map(|block| block.block_hash).collect();
        self.observers
            .notify(|observer| observer.on_blocks_added(&block_hashes));

        let transactions = preprocessed.len();
        for item in preprocessed {
            self.apply_transaction(&item.block, item.tx, item.info);
        }

        let last_height = start_height.saturating_add((blocks.len() - 1) as u32);
        for subscription in self.registry.iter_mut() {
            if !subscription.advance_height(last_height) {
                warn!(
                    height = last_height,
                    known = subscription.container().known_height(),
                    "subscription is already past the batch"
                );
            }
        }

        counter!(BATCHES_TOTAL, "result" => "ok").increment(1);
        debug!(
            start_height,
            last_height,
            transactions,
            "blocks applied"
        );
        true
    }

    pub fn on_blockchain_detach(&mut self, height: u32) {
        info!(height, "blockchain detached");
        self.observers
            .notify(|observer| observer.on_blockchain_detach(height));
        for subscription in self.registry.iter_mut() {
            subscription.on_blockchain_detach(height);
        }
    }

    /// Applies pool changes. The first failing added transaction is reported
    /// to every subscription and returned; later ones are not processed.
    pub fn on_pool_updated(
        &mut self,
        added: &[Transaction],
        deleted: &[Hash],
    ) -> Result<(), ConsumerError> {
        let pool = TransactionBlockInfo::unconfirmed();
        for tx in added {
            self.pool_txs.insert(tx.hash);
            if let Err(err) = self.process_transaction(&pool, tx) {
                error!(txid = %hash_hex(&tx.hash), %err, "failed to process pool transaction");
                for subscription in self.registry.iter_mut() {
                    subscription.on_error(&err, UNCONFIRMED_TRANSACTION_HEIGHT);
                }
                self.record_pool_size();
                return Err(err);
            }
        }

        for tx_hash in deleted {
            self.pool_txs.remove(tx_hash);
            self.delete_unconfirmed(tx_hash);
        }
        self.record_pool_size();
        Ok(())
    }

    pub fn add_unconfirmed_transaction(&mut self, tx: &Transaction) -> Result<(), ConsumerError> {
        self.process_transaction(&TransactionBlockInfo::unconfirmed(), tx)
    }

    pub fn remove_unconfirmed_transaction(&mut self, tx_hash: &Hash) {
        self.delete_unconfirmed(tx_hash);
    }

    pub fn mark_transaction_safe(&mut self, tx_hash: &Hash) {
        for subscription in self.registry.iter_mut() {
            subscription.mark_transaction_safe(tx_hash);
        }
    }

    /// Seeds the known pool set with every unconfirmed transaction a
    /// container holds that is missing from `known`.
    pub fn init_transaction_pool(&mut self, known: &HashSet<Hash>) {
        for subscription in self.registry.iter() {
            for tx_hash in subscription.container().unconfirmed_transaction_hashes() {
                if !known.contains(&tx_hash) {
                    self.pool_txs.insert(tx_hash);
                }
            }
        }
        self.record_pool_size();
    }

    pub fn known_pool_tx_ids(&self) -> HashSet<Hash> {
        self.pool_txs.clone()
    }

    fn process_transaction(
        &mut self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
    ) -> Result<(), ConsumerError> {
        let context = self.registry.scan_context();
        let info = preprocess_outputs(
            &context,
            block,
            tx,
            &self.resolver,
            &StopSignal::new(),
        )?;
        self.apply_transaction(block, tx, info);
        Ok(())
    }

    fn apply_transaction(
        &mut self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        mut info: PreprocessInfo,
    ) {
        claim_transfers(&mut info, tx, &self.ledger);

        let mut updated = false;
        for subscription in self.registry.iter_mut() {
            match apply_to_subscription(subscription, block, tx, &info) {
                Ok(changed) => updated |= changed,
                Err(err) => {
                    error!(
                        txid = %hash_hex(&tx.hash),
                        height = block.height,
                        %err,
                        "failed to apply transaction to subscription"
                    );
                    subscription.report_error(&err, block.height);
                }
            }
        }

        if updated {
            let holders: Vec<AccountPublicAddress> = self
                .registry
                .iter()
                .filter(|subscription| {
                    subscription
                        .container()
                        .transaction_info(&tx.hash)
                        .is_some()
                })
                .map(TransfersSubscription::address)
                .collect();
            self.observers
                .notify(|observer| observer.on_transaction_updated(&tx.hash, &holders));
        }
    }

    fn delete_unconfirmed(&mut self, tx_hash: &Hash) {
        self.observers
            .notify(|observer| observer.on_transaction_delete_begin(tx_hash));
        for subscription in self.registry.iter_mut() {
            subscription.delete_unconfirmed_transaction(tx_hash);
        }
        self.observers
            .notify(|observer| observer.on_transaction_delete_end(tx_hash));
    }

    fn record_pool_size(&self) {
        gauge!(KNOWN_POOL_TRANSACTIONS).set(self.pool_txs.len() as f64);
    }
}

/// Returns whether the subscription's container changed.
fn apply_to_subscription(
    subscription: &mut TransfersSubscription,
    block: &TransactionBlockInfo,
    tx: &Transaction,
    info: &PreprocessInfo,
) -> Result<bool, ConsumerError> {
    let Some(stored) = subscription.container().transaction_info(&tx.hash) else {
        let transfers = info.transfers_for(subscription.spend_public_key());
        return Ok(subscription.add_transaction(block, tx, transfers)?);
    };

    if stored.is_unconfirmed() && !block.is_unconfirmed() {
        subscription.mark_transaction_confirmed(block, &tx.hash, &info.global_indices)?;
        return Ok(true);
    }
    if stored.block_height != block.height {
        return Err(ConsumerError::HeightMismatch {
            txid: hash_hex(&tx.hash),
            stored: stored.block_height,
            incoming: block.height,
        });
    }
    Ok(false)
}
