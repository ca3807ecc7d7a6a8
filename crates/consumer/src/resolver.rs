//! Blocking bridge from scanner threads to the async node client.

use std::sync::Arc;
use std::time::Duration;

use cn_transfers_domain::model::hash_hex;
use cn_transfers_domain::services::telemetry::GLOBAL_INDEX_REQUESTS_TOTAL;
use metrics::counter;
use monero::cryptonote::hash::Hash;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::warn;

use crate::error::ConsumerError;
use crate::rpc::NodeClient;

/// Cooperative stop flag shared by the threads of one batch. Async waiters
/// are woken as soon as it is raised.
#[derive(Debug, Clone)]
pub struct StopSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn stop(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`StopSignal::stop`] has been called.
    pub async fn stopped(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetches global output indices on behalf of threads that are not part of
/// the runtime. Must not be called from inside an async context.
pub struct GlobalIndexResolver {
    node: Arc<dyn NodeClient>,
    runtime: Handle,
    timeout: Duration,
}

impl GlobalIndexResolver {
    pub fn new(node: Arc<dyn NodeClient>, runtime: Handle, timeout: Duration) -> Self {
        Self {
            node,
            runtime,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn resolve(&self, tx_hash: &Hash, stop: &StopSignal) -> Result<Vec<u32>, ConsumerError> {
        if stop.is_stopped() {
            return Err(ConsumerError::Cancelled);
        }

        let outcome = self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = stop.stopped() => Err(ConsumerError::Cancelled),
                response = tokio::time::timeout(
                    self.timeout,
                    self.node.transaction_global_indices(tx_hash),
                ) => match response {
                    Ok(Ok(indices)) => Ok(indices),
                    Ok(Err(err)) => Err(ConsumerError::Node(err)),
                    Err(_) => Err(ConsumerError::Timeout {
                        txid: hash_hex(tx_hash),
                        timeout: self.timeout,
                    }),
                },
            }
        });

        match &outcome {
            Ok(_) => counter!(GLOBAL_INDEX_REQUESTS_TOTAL, "result" => "ok").increment(1),
            Err(err) => {
                counter!(GLOBAL_INDEX_REQUESTS_TOTAL, "result" => err.kind()).increment(1);
                if !matches!(err, ConsumerError::Cancelled) {
                    warn!(txid = %hash_hex(tx_hash), %err, "global index request failed");
                }
            }
        }
        outcome
    }
}
