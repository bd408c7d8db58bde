//! Buffer for transactions from disconnected blocks.
//!
//! During a reorg it is cheaper to collect every disconnected transaction,
//! wait for the new tip, and re-process the survivors once, than to
//! re-admit after each block while the chain is still moving. The buffer
//! keeps both a txid index (so transactions confirmed again in the new
//! chain can be dropped) and the sequence the transactions were collected
//! in, which [`DisconnectedPool::add_for_block`] arranges to be
//! parents-first even though blocks are disconnected tip-backwards.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;

use tracing::debug;

use beck_core::types::{Hash256, Transaction};

use crate::entry::{MempoolEntry, RemovalReason};
use crate::pool::{Mempool, ReorgCheck};

/// Approximate per-transaction bookkeeping cost of the buffer's indexes.
const QUEUE_NODE_USAGE: u64 = 80;

/// Ordered side pool of transactions awaiting replay after a reorg.
#[derive(Default)]
pub struct DisconnectedPool {
    txs: HashMap<Hash256, Arc<Transaction>>,
    /// Replay sequence, parents before children. May retain ids whose
    /// transactions were dropped again; the drain skips them.
    order: VecDeque<Hash256>,
    inner_usage: u64,
}

impl DisconnectedPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Whether a disconnected transaction is waiting for replay.
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.txs.contains_key(txid)
    }

    /// Approximate heap usage of the buffered transactions and indexes.
    pub fn dynamic_memory_usage(&self) -> u64 {
        self.inner_usage + self.txs.len() as u64 * QUEUE_NODE_USAGE
    }

    /// Collect a disconnected block's transactions.
    ///
    /// Blocks are disconnected from the tip backwards, so each new block
    /// holds potential parents of everything already buffered: its
    /// transactions go to the front, keeping in-block order, and the whole
    /// sequence stays topological.
    pub fn add_for_block(&mut self, txs: &[Arc<Transaction>]) {
        for tx in txs.iter().rev() {
            if tx.is_coinbase() {
                continue;
            }
            let Ok(txid) = tx.txid() else { continue };
            if self.txs.contains_key(&txid) {
                continue;
            }
            self.inner_usage += tx_usage(tx);
            self.txs.insert(txid, Arc::clone(tx));
            self.order.push_front(txid);
        }
    }

    /// Move every pool entry into the buffer (parents first) and clear the
    /// pool. Used when a fork (de)activation forces revalidation of the
    /// whole pool; pool transactions can only depend on chain or earlier
    /// pool transactions, so they belong after everything block-sourced.
    pub fn import_mempool(&mut self, pool: &mut Mempool) {
        for tx in pool.topological_txs() {
            let Ok(txid) = tx.txid() else { continue };
            if self.txs.contains_key(&txid) {
                continue;
            }
            self.inner_usage += tx_usage(&tx);
            self.txs.insert(txid, tx);
            self.order.push_back(txid);
        }
        pool.clear();
    }

    /// Drop transactions confirmed again by a block on the new chain.
    pub fn remove_for_block(&mut self, txs: &[Arc<Transaction>]) {
        if self.txs.is_empty() {
            // Common case: a block extends the tip mid-reorg processing.
            return;
        }
        for tx in txs {
            let Ok(txid) = tx.txid() else { continue };
            if let Some(removed) = self.txs.remove(&txid) {
                self.inner_usage -= tx_usage(&removed);
            }
        }
    }

    /// Drop everything without replaying.
    pub fn clear(&mut self) {
        self.txs.clear();
        self.order.clear();
        self.inner_usage = 0;
    }

    /// Make the pool consistent after the new tip is active.
    ///
    /// When `add_back` is set, buffered transactions are offered to
    /// `try_accept` in sequence order (parents first); `try_accept` runs
    /// the full admission path and reports success. Rejected transactions
    /// (and all buffered coinbases) are removed from the pool recursively
    /// if present. Afterwards the two-phase fix-up runs: re-admitted
    /// transactions get their surviving in-pool descendants relinked, and
    /// descendants that now exceed the ancestor limits are removed
    /// recursively. Finally `filter` re-checks every remaining entry's
    /// finality and maturity against the new tip.
    ///
    /// The buffer is empty when this returns.
    pub fn update_mempool_for_reorg(
        &mut self,
        pool: &mut Mempool,
        add_back: bool,
        mut try_accept: impl FnMut(&mut Mempool, Arc<Transaction>) -> bool,
        filter: impl FnMut(&MempoolEntry) -> ReorgCheck,
    ) {
        let mut accepted: Vec<Hash256> = Vec::new();
        let mut order = mem::take(&mut self.order);
        let mut replayed = 0usize;

        for txid in order.drain(..) {
            let Some(tx) = self.txs.remove(&txid) else {
                continue; // confirmed again on the new chain
            };
            self.inner_usage -= tx_usage(&tx);
            replayed += 1;

            let keep = add_back && !tx.is_coinbase() && try_accept(pool, Arc::clone(&tx));
            if keep {
                if pool.exists(&txid) {
                    accepted.push(txid);
                }
            } else if pool.exists(&txid) {
                // Rejected on the new chain: it cannot stay, nor can
                // anything that spends it.
                pool.remove_recursive(&txid, RemovalReason::Reorg);
            }
        }
        debug!(replayed, accepted = accepted.len(), add_back, "reorg replay finished");

        let limits = pool.config().limits.clone();
        let to_remove =
            pool.update_transactions_from_block(&accepted, limits.ancestor_size, limits.ancestor_count);
        for txid in &to_remove {
            pool.remove_recursive(txid, RemovalReason::SizeLimit);
        }

        pool.remove_for_reorg(filter);
    }
}

fn tx_usage(tx: &Transaction) -> u64 {
    let vecs: u64 = tx
        .inputs
        .iter()
        .map(|i| (i.signature.len() + i.public_key.len()) as u64)
        .sum();
    mem::size_of::<Transaction>() as u64 + vecs + (tx.outputs.len() * 40) as u64
}

impl Drop for DisconnectedPool {
    fn drop(&mut self) {
        // The reorg path must drain this buffer before letting it go; a
        // non-empty buffer here means disconnected transactions were
        // silently lost.
        if !std::thread::panicking() {
            debug_assert!(
                self.txs.is_empty(),
                "disconnected-block buffer dropped with {} transactions",
                self.txs.len()
            );
        }
    }
}
