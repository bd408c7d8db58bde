//! UTXO view layered over the pool.
//!
//! Validating a transaction that spends unconfirmed outputs needs those
//! outputs visible as coins. [`MempoolCoinsView`] stacks three layers,
//! highest precedence first: a per-package scratch area (outputs of
//! transactions currently under evaluation, not yet submitted), outputs of
//! in-pool transactions, and a base chain view. It never writes through.

use std::collections::HashMap;

use beck_core::types::{OutPoint, Transaction, UtxoEntry};
use beck_core::utxo::UtxoView;

use crate::pool::Mempool;

/// Sentinel height marking coins that exist only in the memory pool.
pub const MEMPOOL_HEIGHT: u64 = 0x7FFF_FFFF;

/// Read-only coins view: package scratch coins, then pool outputs, then the
/// base view.
pub struct MempoolCoinsView<'a, V: UtxoView> {
    base: &'a V,
    mempool: &'a Mempool,
    /// Coins made available by transactions being validated together.
    /// Lets later package members see earlier members' outputs without
    /// submitting anything.
    package_coins: HashMap<OutPoint, UtxoEntry>,
}

impl<'a, V: UtxoView> MempoolCoinsView<'a, V> {
    pub fn new(base: &'a V, mempool: &'a Mempool) -> Self {
        Self { base, mempool, package_coins: HashMap::new() }
    }

    /// Stage the outputs of a package member into the scratch layer.
    ///
    /// Scratch coins are never flushed anywhere; they vanish with the view.
    pub fn add_package_transaction(&mut self, tx: &Transaction) {
        let Ok(txid) = tx.txid() else { return };
        for (index, output) in tx.outputs.iter().enumerate() {
            self.package_coins.insert(
                OutPoint::new(txid, index as u64),
                UtxoEntry {
                    output: output.clone(),
                    block_height: MEMPOOL_HEIGHT,
                    is_coinbase: false,
                },
            );
        }
    }
}

impl<V: UtxoView> UtxoView for MempoolCoinsView<'_, V> {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        if let Some(coin) = self.package_coins.get(outpoint) {
            return Some(coin.clone());
        }
        if let Some(tx) = self.mempool.get(&outpoint.txid) {
            return tx.outputs.get(outpoint.index as usize).map(|output| UtxoEntry {
                output: output.clone(),
                block_height: MEMPOOL_HEIGHT,
                is_coinbase: false,
            });
        }
        self.base.get_coin(outpoint)
    }
}
