//! Shared helpers for mempool integration tests.
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::Arc;

use beck_core::types::{Hash256, OutPoint, Transaction, TxInput, TxOutput, UtxoEntry};
use beck_core::utxo::UtxoView;
use beck_mempool::{FeeRate, LockPoints, Mempool, MempoolConfig, MempoolEntry};

/// A view that funds any outpoint, so self-checks never trip on inputs the
/// tests treat as confirmed.
pub struct PermissiveView;

impl UtxoView for PermissiveView {
    fn get_coin(&self, _outpoint: &OutPoint) -> Option<UtxoEntry> {
        Some(UtxoEntry {
            output: TxOutput { value: 1_000_000, pubkey_hash: Hash256::ZERO },
            block_height: 0,
            is_coinbase: false,
        })
    }
}

/// Pool with self-checking on and a small incremental relay fee.
pub fn checked_pool() -> Mempool {
    Mempool::new(MempoolConfig {
        check_ratio: 1,
        incremental_relay_fee: FeeRate::from_becks_per_kb(10),
        ..MempoolConfig::default()
    })
}

/// An outpoint outside the pool, unique per seed.
pub fn outpoint(seed: u8, index: u64) -> OutPoint {
    OutPoint::new(Hash256([seed; 32]), index)
}

/// Transaction spending `inputs` into `n_outputs` equal outputs. `tag`
/// makes otherwise-identical transactions distinct.
pub fn make_tx(inputs: &[OutPoint], n_outputs: usize, tag: u64) -> Arc<Transaction> {
    Arc::new(Transaction {
        version: 1,
        inputs: inputs
            .iter()
            .map(|op| TxInput {
                previous_output: op.clone(),
                signature: vec![0; 64],
                public_key: vec![0; 32],
            })
            .collect(),
        outputs: (0..n_outputs)
            .map(|_| TxOutput { value: 1000, pubkey_hash: Hash256::ZERO })
            .collect(),
        lock_time: tag,
    })
}

/// Transaction spending output `index` of `parent`.
pub fn spend(parent: &Arc<Transaction>, index: u64, tag: u64) -> Arc<Transaction> {
    make_tx(&[OutPoint::new(parent.txid().unwrap(), index)], 1, tag)
}

pub fn coinbase(tag: u64) -> Arc<Transaction> {
    Arc::new(Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature: vec![],
            public_key: vec![],
        }],
        outputs: vec![TxOutput { value: 5000, pubkey_hash: Hash256::ZERO }],
        lock_time: tag,
    })
}

pub fn entry_for(tx: &Arc<Transaction>, fee: u64, time: i64) -> MempoolEntry {
    MempoolEntry::new(
        Arc::clone(tx),
        fee,
        time,
        0,
        false,
        tx.inputs.len() as i64,
        LockPoints::default(),
    )
    .unwrap()
}
