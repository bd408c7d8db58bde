//! # beck-mempool
//!
//! Transaction memory pool for the Beck full node.
//!
//! This crate provides:
//! - A multi-ordered pool of unconfirmed transactions: txid lookup plus
//!   descendant-feerate (eviction), ancestor-feerate (mining), and
//!   entry-time (expiry) orderings kept consistent across every mutation
//! - A dependency graph over in-pool transactions with incrementally
//!   maintained aggregates over each entry's ancestor and descendant sets
//! - Chain-topology limits at admission, size-based eviction with a
//!   decaying minimum-feerate floor, and age-based expiry
//! - A reorg buffer that replays disconnected-block transactions
//!   parents-first once the new tip is active
//! - A layered coins view exposing unconfirmed outputs to validation
//!
//! Transactions must be validated by the caller before submission (see
//! `beck_core::validation`); the pool trusts the fee and sigcheck totals it
//! is handed and enforces only its own structural rules: no duplicate
//! txids, no double-spends of an in-pool outpoint, and the ancestor and
//! descendant limits.
//!
//! The pool is not internally synchronised. The node owns it behind a
//! `parking_lot::Mutex`, acquiring the chainstate lock first whenever both
//! are needed.

mod coins;
mod config;
mod entry;
mod epoch;
mod error;
mod feerate;
mod index;
mod pool;
mod reorg;
mod rolling_fee;

pub use coins::{MempoolCoinsView, MEMPOOL_HEIGHT};
pub use config::{
    MempoolConfig, MempoolLimits, DEFAULT_ANCESTOR_COUNT_LIMIT, DEFAULT_ANCESTOR_SIZE_LIMIT,
    DEFAULT_DESCENDANT_COUNT_LIMIT, DEFAULT_DESCENDANT_SIZE_LIMIT, DEFAULT_EXPIRY_SECS,
    DEFAULT_MAX_POOL_SIZE,
};
pub use entry::{
    virtual_size, LockPoints, MempoolEntry, RemovalReason, TransactionAncestry, TxMempoolInfo,
};
pub use error::{MempoolError, MempoolResult};
pub use feerate::FeeRate;
pub use pool::{Mempool, MempoolObserver, ReorgCheck};
pub use reorg::DisconnectedPool;
pub use rolling_fee::ROLLING_FEE_HALF_LIFE;
