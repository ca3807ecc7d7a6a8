use std::sync::Arc;

use cn_transfers_domain::model::{
    hash_hex, AccountKeys, AccountPublicAddress, AccountSubscription, SynchronizationStart,
    Transaction, TransactionBlockInfo, TransactionOutputInformation,
    UNCONFIRMED_TRANSACTION_HEIGHT,
};
use cn_transfers_domain::storage::{StorageResult, TransfersContainer};
use monero::cryptonote::hash::Hash;
use monero::util::key::PublicKey;
use tracing::{debug, warn};

use crate::error::ConsumerError;
use crate::observer::ObserverManager;

/// Events raised for one tracked account.
#[allow(unused_variables)]
pub trait SubscriptionObserver: Send + Sync {
    fn on_error(&self, address: &AccountPublicAddress, height: u32, error: &ConsumerError) {}

    fn on_transaction_updated(&self, address: &AccountPublicAddress, tx_hash: &Hash) {}

    fn on_transaction_deleted(&self, address: &AccountPublicAddress, tx_hash: &Hash) {}
}

/// Live tracking state of one account: its keys, its scan floor and the
/// container its transfers are written to.
pub struct TransfersSubscription {
    subscription: AccountSubscription,
    container: Box<dyn TransfersContainer>,
    observers: ObserverManager<dyn SubscriptionObserver>,
}

impl TransfersSubscription {
    pub fn new(subscription: AccountSubscription, container: Box<dyn TransfersContainer>) -> Self {
        Self {
            subscription,
            container,
            observers: ObserverManager::new(),
        }
    }

    pub fn address(&self) -> AccountPublicAddress {
        self.subscription.keys.address
    }

    pub fn keys(&self) -> &AccountKeys {
        &self.subscription.keys
    }

    pub fn spend_public_key(&self) -> &PublicKey {
        self.subscription.keys.spend_public_key()
    }

    pub fn sync_start(&self) -> SynchronizationStart {
        self.subscription.sync_start
    }

    pub fn container(&self) -> &dyn TransfersContainer {
        self.container.as_ref()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn SubscriptionObserver>) -> bool {
        self.observers.add(observer)
    }

    pub fn remove_observer(&mut self, observer: &Arc<dyn SubscriptionObserver>) -> bool {
        self.observers.remove(observer)
    }

    /// Confirmed state from `height` on is dropped before observers hear about
    /// the failure, so the range can be rescanned.
    pub fn on_error(&mut self, error: &ConsumerError, height: u32) {
        if height != UNCONFIRMED_TRANSACTION_HEIGHT {
            let dropped = self.container.detach(height);
            if !dropped.is_empty() {
                debug!(height, dropped = dropped.len(), "detached after error");
            }
        }
        self.report_error(error, height);
    }

    /// Tells observers about a failure that leaves stored state untouched.
    pub fn report_error(&self, error: &ConsumerError, height: u32) {
        let address = self.address();
        self.observers
            .notify(|observer| observer.on_error(&address, height, error));
    }

    pub fn advance_height(&mut self, height: u32) -> bool {
        self.container.advance_height(height)
    }

    pub fn add_transaction(
        &mut self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        transfers: &[TransactionOutputInformation],
    ) -> StorageResult<bool> {
        let added = self.container.add_transaction(block, tx, transfers)?;
        if added {
            self.notify_updated(&tx.hash);
        }
        Ok(added)
    }

    pub fn mark_transaction_confirmed(
        &mut self,
        block: &TransactionBlockInfo,
        tx_hash: &Hash,
        global_indices: &[u32],
    ) -> StorageResult<()> {
        self.container
            .mark_transaction_confirmed(block, tx_hash, global_indices)?;
        self.notify_updated(tx_hash);
        Ok(())
    }

    pub fn delete_unconfirmed_transaction(&mut self, tx_hash: &Hash) {
        if self.container.delete_unconfirmed_transaction(tx_hash) {
            self.notify_deleted(tx_hash);
        }
    }

    pub fn mark_transaction_safe(&mut self, tx_hash: &Hash) {
        self.container.mark_transaction_safe(tx_hash);
    }

    pub fn on_blockchain_detach(&mut self, height: u32) {
        let removed = self.container.detach(height);
        if !removed.is_empty() {
            warn!(height, removed = removed.len(), "detached transactions from subscription");
        }
        for tx_hash in &removed {
            self.notify_deleted(tx_hash);
        }
    }

    fn notify_updated(&self, tx_hash: &Hash) {
        let address = self.address();
        self.observers
            .notify(|observer| observer.on_transaction_updated(&address, tx_hash));
    }

    fn notify_deleted(&self, tx_hash: &Hash) {
        debug!(txid = %hash_hex(tx_hash), "transaction deleted from subscription");
        let address = self.address();
        self.observers
            .notify(|observer| observer.on_transaction_deleted(&address, tx_hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account, block_info, pay, subscription, RecordingSubscriptionObserver};
    use cn_transfers_storage::MemoryTransfersContainer;

    fn tracked() -> (TransfersSubscription, Arc<RecordingSubscriptionObserver>) {
        let keys = account(1, 2);
        let mut sub = TransfersSubscription::new(
            subscription(keys, 0, 0),
            Box::new(MemoryTransfersContainer::new()),
        );
        let observer = Arc::new(RecordingSubscriptionObserver::default());
        sub.add_observer(observer.clone());
        (sub, observer)
    }

    #[test]
    fn error_detaches_confirmed_state_and_notifies() {
        let (mut sub, observer) = tracked();
        let keys = *sub.keys();
        let tx = pay(30, &[(&keys, 5)]);
        let transfers = crate::testing::transfers_for(&keys, &tx, &block_info(12, 0));
        assert!(sub.add_transaction(&block_info(12, 0), &tx, &transfers).unwrap());

        sub.on_error(&ConsumerError::Cancelled, 10);
        assert!(sub.container().transaction_info(&tx.hash).is_none());
        assert_eq!(observer.errors(), vec![(sub.address(), 10, "cancelled".to_string())]);
        assert!(observer.deleted().is_empty());
    }

    #[test]
    fn reported_error_keeps_stored_state() {
        let (mut sub, observer) = tracked();
        let keys = *sub.keys();
        let tx = pay(34, &[(&keys, 5)]);
        let transfers = crate::testing::transfers_for(&keys, &tx, &block_info(12, 0));
        sub.add_transaction(&block_info(12, 0), &tx, &transfers).unwrap();

        sub.report_error(&ConsumerError::Cancelled, 12);
        assert!(sub.container().transaction_info(&tx.hash).is_some());
        assert_eq!(sub.container().known_height(), 0);
        assert_eq!(observer.errors(), vec![(sub.address(), 12, "cancelled".to_string())]);
    }

    #[test]
    fn unconfirmed_error_keeps_stored_state() {
        let (mut sub, observer) = tracked();
        let keys = *sub.keys();
        let tx = pay(31, &[(&keys, 5)]);
        let transfers = crate::testing::transfers_for(&keys, &tx, &block_info(12, 0));
        sub.add_transaction(&block_info(12, 0), &tx, &transfers).unwrap();

        sub.on_error(&ConsumerError::Cancelled, UNCONFIRMED_TRANSACTION_HEIGHT);
        assert!(sub.container().transaction_info(&tx.hash).is_some());
        assert_eq!(observer.errors().len(), 1);
    }

    #[test]
    fn detach_reports_each_removed_transaction() {
        let (mut sub, observer) = tracked();
        let keys = *sub.keys();
        let early = pay(32, &[(&keys, 5)]);
        let late = pay(33, &[(&keys, 6)]);
        for (tx, height) in [(&early, 3), (&late, 8)] {
            let info = block_info(height, 0);
            let transfers = crate::testing::transfers_for(&keys, tx, &info);
            sub.add_transaction(&info, tx, &transfers).unwrap();
        }
        assert_eq!(observer.updated(), vec![early.hash, late.hash]);

        sub.on_blockchain_detach(5);
        assert_eq!(observer.deleted(), vec![late.hash]);
        assert!(sub.container().transaction_info(&early.hash).is_some());
    }

    #[test]
    fn deleting_unknown_pool_transaction_is_silent() {
        let (mut sub, observer) = tracked();
        sub.delete_unconfirmed_transaction(&crate::testing::hash(99));
        assert!(observer.deleted().is_empty());
    }
}
