//! Parallel preprocessing of a block batch.
//!
//! One producer walks the blocks and feeds candidate transactions into a
//! bounded queue; `workers` threads match them and resolve global indices.
//! Every thread is scoped to the call, so nothing outlives the borrowed
//! blocks. Results are re-sorted into chain order before they are returned.

use std::sync::{Mutex, MutexGuard};
use std::thread;

use cn_transfers_domain::model::{
    hash_hex, CompleteBlock, SynchronizationStart, Transaction, TransactionBlockInfo,
};
use cn_transfers_domain::services::telemetry::BATCH_TRANSACTIONS;
use crossbeam_channel::{bounded, Receiver, Sender};
use metrics::histogram;
use tracing::{debug, error};

use crate::error::ConsumerError;
use crate::pipeline::{preprocess_outputs, PreprocessInfo, ScanContext};
use crate::resolver::{GlobalIndexResolver, StopSignal};

/// A matched transaction together with its position in the chain.
#[derive(Debug)]
pub struct PreprocessedTransaction<'b> {
    pub block: TransactionBlockInfo,
    pub tx: &'b Transaction,
    pub info: PreprocessInfo,
}

struct Candidate<'b> {
    block: TransactionBlockInfo,
    tx: &'b Transaction,
}

/// Shared inputs of one batch.
pub struct BatchScanner<'a> {
    pub context: &'a ScanContext,
    pub resolver: &'a GlobalIndexResolver,
    pub sync_start: SynchronizationStart,
    pub workers: usize,
}

impl BatchScanner<'_> {
    /// Matches every transaction of `blocks`, the first of which sits at
    /// `start_height`. Any worker error stops the batch and is returned; the
    /// first one recorded wins.
    pub fn preprocess_blocks<'b>(
        &self,
        blocks: &'b [CompleteBlock],
        start_height: u32,
    ) -> Result<Vec<PreprocessedTransaction<'b>>, ConsumerError> {
        let workers = self.workers.max(1);
        let stop = StopSignal::new();
        let results: Mutex<Vec<PreprocessedTransaction<'b>>> = Mutex::new(Vec::new());
        let first_error: Mutex<Option<ConsumerError>> = Mutex::new(None);
        let (sender, receiver) = bounded::<Candidate<'b>>(workers * 2);

        let panicked = thread::scope(|scope| {
            let stop = &stop;
            let results = &results;
            let first_error = &first_error;

            let producer =
                scope.spawn(move || self.extract(blocks, start_height, sender, stop));
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let receiver = receiver.clone();
                    scope.spawn(move || self.work(receiver, stop, results, first_error))
                })
                .collect();
            drop(receiver);

            let mut panicked = producer.join().is_err();
            for handle in handles {
                panicked |= handle.join().is_err();
            }
            panicked
        });

        if let Some(err) = lock(&first_error).take() {
            return Err(err);
        }
        if panicked {
            error!(start_height, "scanner thread panicked");
            return Err(ConsumerError::Cancelled);
        }

        let mut ordered = results
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ordered.sort_by_key(|item| (item.block.height, item.block.transaction_index));
        histogram!(BATCH_TRANSACTIONS).record(ordered.len() as f64);
        Ok(ordered)
    }

    fn extract<'b>(
        &self,
        blocks: &'b [CompleteBlock],
        start_height: u32,
        sender: Sender<Candidate<'b>>,
        stop: &StopSignal,
    ) {
        let floor = self.sync_start.timestamp;
        for (offset, complete) in blocks.iter().enumerate() {
            if stop.is_stopped() {
                return;
            }
            let Some(header) = complete.block.as_ref() else {
                continue;
            };
            if floor > 0 && header.timestamp < floor {
                continue;
            }

            let height = start_height.saturating_add(offset as u32);
            for (index, tx) in complete.transactions.iter().enumerate() {
                if tx.public_key.is_none() {
                    continue;
                }
                let candidate = Candidate {
                    block: TransactionBlockInfo {
                        height,
                        timestamp: header.timestamp,
                        transaction_index: index as u32,
                    },
                    tx,
                };
                if stop.is_stopped() || sender.send(candidate).is_err() {
                    return;
                }
            }
        }
    }

    fn work<'b>(
        &self,
        receiver: Receiver<Candidate<'b>>,
        stop: &StopSignal,
        results: &Mutex<Vec<PreprocessedTransaction<'b>>>,
        first_error: &Mutex<Option<ConsumerError>>,
    ) {
        while let Ok(candidate) = receiver.recv() {
            if stop.is_stopped() {
                return;
            }
            match preprocess_outputs(
                self.context,
                &candidate.block,
                candidate.tx,
                self.resolver,
                stop,
            ) {
                Ok(info) => lock(results).push(PreprocessedTransaction {
                    block: candidate.block,
                    tx: candidate.tx,
                    info,
                }),
                Err(err) => {
                    debug!(
                        txid = %hash_hex(&candidate.tx.hash),
                        height = candidate.block.height,
                        %err,
                        "preprocessing failed, stopping batch"
                    );
                    let mut slot = lock(first_error);
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                    drop(slot);
                    stop.stop();
                    return;
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
