//! Transfers consumer: finds the outputs of incoming blocks and pool
//! transactions that pay subscribed accounts and hands them to per-account
//! containers.
//!
//! Blocks are matched in parallel on scoped worker threads and applied in
//! chain order on the calling thread. Global output indices come from the
//! node through [`rpc::NodeClient`], driven on a caller-supplied tokio
//! runtime.

pub mod consumer;
pub mod error;
pub mod observer;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod rpc;
pub mod subscription;
pub mod worker;

#[cfg(test)]
mod testing;

pub use consumer::TransfersConsumer;
pub use error::ConsumerError;
pub use observer::{ConsumerObserver, ObserverManager};
pub use pipeline::{PreprocessInfo, ScanContext};
pub use registry::SubscriptionRegistry;
pub use resolver::{GlobalIndexResolver, StopSignal};
pub use rpc::{HttpNodeClient, NodeClient, NodeError};
pub use subscription::{SubscriptionObserver, TransfersSubscription};
pub use worker::{BatchScanner, PreprocessedTransaction};
