use std::sync::Arc;

use cn_transfers_domain::model::AccountPublicAddress;
use monero::cryptonote::hash::Hash;

/// Events raised by a [`crate::TransfersConsumer`] as it applies chain data.
#[allow(unused_variables)]
pub trait ConsumerObserver: Send + Sync {
    fn on_blocks_added(&self, block_hashes: &[Hash]) {}

    fn on_blockchain_detach(&self, height: u32) {}

    /// `addresses` lists every subscription whose container holds `tx_hash`.
    fn on_transaction_updated(&self, tx_hash: &Hash, addresses: &[AccountPublicAddress]) {}

    fn on_transaction_delete_begin(&self, tx_hash: &Hash) {}

    fn on_transaction_delete_end(&self, tx_hash: &Hash) {}
}

/// Ordered set of observers. Registering the same `Arc` twice is a no-op.
pub struct ObserverManager<T: ?Sized> {
    observers: Vec<Arc<T>>,
}

impl<T: ?Sized> ObserverManager<T> {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn add(&mut self, observer: Arc<T>) -> bool {
        if self.observers.iter().any(|known| Arc::ptr_eq(known, &observer)) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    pub fn remove(&mut self, observer: &Arc<T>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|known| !Arc::ptr_eq(known, observer));
        self.observers.len() != before
    }

    pub fn notify(&self, mut event: impl FnMut(&T)) {
        for observer in &self.observers {
            event(observer.as_ref());
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<T: ?Sized> Default for ObserverManager<T> {
    fn default() -> Self {
        Self::new()
    }
}
