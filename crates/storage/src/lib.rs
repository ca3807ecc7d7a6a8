//! In-memory transfer containers that satisfy the domain storage traits while
//! keeping the backend swappable behind `TransfersContainer`.

mod container;

use cn_transfers_domain::model::AccountSubscription;
use cn_transfers_domain::storage::{ContainerFactory, TransfersContainer};
use tracing::debug;

pub use container::MemoryTransfersContainer;

/// Hands every new subscription a fresh [`MemoryTransfersContainer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryContainerFactory;

impl ContainerFactory for MemoryContainerFactory {
    fn create(&self, subscription: &AccountSubscription) -> Box<dyn TransfersContainer> {
        debug!(
            sync_height = subscription.sync_start.height,
            "creating in-memory transfers container"
        );
        Box::new(MemoryTransfersContainer::new())
    }
}
