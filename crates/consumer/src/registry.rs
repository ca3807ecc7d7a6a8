use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use cn_transfers_domain::model::{
    key_hex, AccountPublicAddress, AccountSubscription, SynchronizationStart,
};
use cn_transfers_domain::storage::ContainerFactory;
use monero::util::key::{PrivateKey, PublicKey};
use tracing::info;

use crate::error::ConsumerError;
use crate::pipeline::ScanContext;
use crate::subscription::TransfersSubscription;

/// Subscriptions of one consumer, keyed by spend public key. Every
/// subscription shares the consumer's view secret.
pub struct SubscriptionRegistry {
    view_secret: PrivateKey,
    subscriptions: HashMap<PublicKey, TransfersSubscription>,
    spend_keys: HashSet<PublicKey>,
    sync_start: SynchronizationStart,
    factory: Box<dyn ContainerFactory>,
}

impl SubscriptionRegistry {
    pub fn new(view_secret: PrivateKey, factory: Box<dyn ContainerFactory>) -> Self {
        Self {
            view_secret,
            subscriptions: HashMap::new(),
            spend_keys: HashSet::new(),
            sync_start: SynchronizationStart::UNBOUNDED,
            factory,
        }
    }

    pub fn view_secret(&self) -> &PrivateKey {
        &self.view_secret
    }

    /// Registers `subscription`, or returns the existing entry for its spend
    /// key untouched.
    pub fn add_subscription(
        &mut self,
        subscription: AccountSubscription,
    ) -> Result<&mut TransfersSubscription, ConsumerError> {
        if subscription.keys.view_secret_key.as_bytes() != self.view_secret.as_bytes() {
            return Err(ConsumerError::ViewKeyMismatch);
        }

        let spend_key = *subscription.keys.spend_public_key();
        let first = self.subscriptions.is_empty();
        match self.subscriptions.entry(spend_key) {
            Entry::Occupied(existing) => Ok(existing.into_mut()),
            Entry::Vacant(slot) => {
                self.sync_start = if first {
                    subscription.sync_start
                } else {
                    self.sync_start.min(subscription.sync_start)
                };
                let container = self.factory.create(&subscription);
                info!(
                    spend_key = %key_hex(&spend_key),
                    sync_height = subscription.sync_start.height,
                    "subscription added"
                );
                self.spend_keys.insert(spend_key);
                Ok(slot.insert(TransfersSubscription::new(subscription, container)))
            }
        }
    }

    /// Returns whether the registry is empty afterwards.
    pub fn remove_subscription(&mut self, address: &AccountPublicAddress) -> bool {
        let spend_key = &address.spend_public_key;
        if self.subscriptions.remove(spend_key).is_some() {
            self.spend_keys.remove(spend_key);
            info!(spend_key = %key_hex(spend_key), "subscription removed");
            self.sync_start = self
                .subscriptions
                .values()
                .map(TransfersSubscription::sync_start)
                .fold(SynchronizationStart::UNBOUNDED, SynchronizationStart::min);
        }
        self.subscriptions.is_empty()
    }

    pub fn subscription(&self, address: &AccountPublicAddress) -> Option<&TransfersSubscription> {
        self.subscriptions.get(&address.spend_public_key)
    }

    pub fn subscription_mut(
        &mut self,
        address: &AccountPublicAddress,
    ) -> Option<&mut TransfersSubscription> {
        self.subscriptions.get_mut(&address.spend_public_key)
    }

    pub fn subscriptions(&self) -> Vec<AccountPublicAddress> {
        self.subscriptions
            .values()
            .map(TransfersSubscription::address)
            .collect()
    }

    pub fn sync_start(&self) -> SynchronizationStart {
        self.sync_start
    }

    pub fn spend_keys(&self) -> &HashSet<PublicKey> {
        &self.spend_keys
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransfersSubscription> {
        self.subscriptions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TransfersSubscription> {
        self.subscriptions.values_mut()
    }

    /// Immutable copy of the keys worker threads match against.
    pub fn scan_context(&self) -> ScanContext {
        ScanContext::new(
            self.view_secret,
            self.subscriptions
                .values()
                .map(|subscription| *subscription.keys()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account, subscription};
    use cn_transfers_storage::MemoryContainerFactory;

    fn registry() -> SubscriptionRegistry {
        let view = account(1, 2).view_secret_key;
        SubscriptionRegistry::new(view, Box::new(MemoryContainerFactory))
    }

    #[test]
    fn sync_start_is_component_wise_minimum() {
        let mut registry = registry();
        assert_eq!(registry.sync_start(), SynchronizationStart::UNBOUNDED);

        registry
            .add_subscription(subscription(account(1, 2), 100, 5_000))
            .unwrap();
        assert_eq!(registry.sync_start(), SynchronizationStart::new(100, 5_000));

        registry
            .add_subscription(subscription(account(1, 3), 200, 4_000))
            .unwrap();
        assert_eq!(registry.sync_start(), SynchronizationStart::new(100, 4_000));
        assert_eq!(registry.spend_keys().len(), 2);

        assert!(!registry.remove_subscription(&account(1, 2).address));
        assert_eq!(registry.sync_start(), SynchronizationStart::new(200, 4_000));

        assert!(registry.remove_subscription(&account(1, 3).address));
        assert_eq!(registry.sync_start(), SynchronizationStart::UNBOUNDED);
        assert!(registry.spend_keys().is_empty());
    }

    #[test]
    fn adding_twice_keeps_the_first_subscription() {
        let mut registry = registry();
        registry
            .add_subscription(subscription(account(1, 2), 100, 0))
            .unwrap();
        let existing = registry
            .add_subscription(subscription(account(1, 2), 5, 0))
            .unwrap();
        assert_eq!(existing.sync_start().height, 100);
        assert_eq!(registry.sync_start().height, 100);
        assert_eq!(registry.subscriptions().len(), 1);
    }

    #[test]
    fn foreign_view_key_is_rejected() {
        let mut registry = registry();
        let err = registry
            .add_subscription(subscription(account(7, 2), 0, 0))
            .err()
            .expect("view key mismatch");
        assert!(matches!(err, ConsumerError::ViewKeyMismatch));
        assert!(registry.is_empty());
    }

    #[test]
    fn removing_unknown_address_changes_nothing() {
        let mut registry = registry();
        registry
            .add_subscription(subscription(account(1, 2), 100, 0))
            .unwrap();
        assert!(!registry.remove_subscription(&account(1, 9).address));
        assert_eq!(registry.sync_start().height, 100);
        assert!(registry.subscription(&account(1, 2).address).is_some());
    }

    #[test]
    fn scan_context_snapshots_keys() {
        let mut registry = registry();
        registry
            .add_subscription(subscription(account(1, 2), 0, 0))
            .unwrap();
        let context = registry.scan_context();
        registry.remove_subscription(&account(1, 2).address);

        assert!(context
            .spend_keys()
            .contains(account(1, 2).spend_public_key()));
        assert!(context.account(account(1, 2).spend_public_key()).is_some());
    }
}
