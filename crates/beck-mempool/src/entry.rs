//! Mempool entries and their cached accounting.
//!
//! A [`MempoolEntry`] stores one unconfirmed transaction plus everything the
//! pool needs without re-deriving it: fee, sizes, sigchecks, entry metadata,
//! and running aggregates over the entry's in-pool ancestor and descendant
//! sets (both include the entry itself). Aggregates are maintained
//! incrementally by the pool engine; mutating them directly would desync the
//! secondary orderings, so all mutation goes through the update methods and
//! the index's `modify`.

use std::collections::BTreeSet;
use std::fmt;
use std::mem;
use std::sync::Arc;

use beck_core::constants::BYTES_PER_SIG_CHECK;
use beck_core::error::TransactionError;
use beck_core::types::{Hash256, Transaction, TxInput, TxOutput};

/// Height and time at which a transaction's relative locks were last
/// satisfied, plus the block that anchored the computation.
///
/// As long as the active chain still descends from `max_input_block`, the
/// cached values remain valid across a reorg.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockPoints {
    /// Chain height satisfying all relative-locktime constraints.
    pub height: u64,
    /// Median time past satisfying all relative-locktime constraints.
    pub time: i64,
    /// Highest block containing one of the inputs used in the calculation.
    pub max_input_block: Option<Hash256>,
}

/// Why a transaction left the pool. Attached to every removal and surfaced
/// to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Expired from the pool by age.
    Expiry,
    /// Removed in size limiting.
    SizeLimit,
    /// Removed for reorganization.
    Reorg,
    /// Included in a connected block.
    Block,
    /// Conflicts with an in-block transaction.
    Conflict,
    /// Replaced by a higher-paying spender of the same inputs.
    Replaced,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Expiry => "expiry",
            Self::SizeLimit => "size limit",
            Self::Reorg => "reorg",
            Self::Block => "block",
            Self::Conflict => "conflict",
            Self::Replaced => "replaced",
        };
        f.write_str(s)
    }
}

/// Snapshot of a pool transaction handed to callers.
#[derive(Debug, Clone)]
pub struct TxMempoolInfo {
    /// The transaction itself.
    pub tx: Arc<Transaction>,
    /// Time the transaction entered the pool (unix seconds).
    pub time: i64,
    /// Base fee of the transaction in becks.
    pub fee: u64,
    /// Virtual size of the transaction.
    pub vsize: u64,
    /// Operator-assigned fee delta in becks.
    pub fee_delta: i64,
}

/// Ancestry statistics for one pool transaction, all self-inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionAncestry {
    /// Number of in-pool ancestors, including the transaction.
    pub ancestor_count: u64,
    /// Number of in-pool descendants, including the transaction.
    pub descendant_count: u64,
    /// Total size of the transaction and its ancestors.
    pub ancestor_size: u64,
    /// Total modified fees of the transaction and its ancestors.
    pub ancestor_fees: i64,
}

/// Size measure charging sigcheck-dense transactions for verification cost.
pub fn virtual_size(size: u64, sig_checks: i64) -> u64 {
    size.max(sig_checks.max(0) as u64 * BYTES_PER_SIG_CHECK)
}

/// Approximate heap usage of a transaction and its vectors.
fn tx_memory_usage(tx: &Transaction) -> u64 {
    let inputs: u64 = tx
        .inputs
        .iter()
        .map(|i| (mem::size_of::<TxInput>() + i.signature.len() + i.public_key.len()) as u64)
        .sum();
    let outputs = (tx.outputs.len() * mem::size_of::<TxOutput>()) as u64;
    mem::size_of::<Transaction>() as u64 + inputs + outputs
}

/// One unconfirmed transaction plus cached accounting.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    tx: Arc<Transaction>,
    txid: Hash256,
    /// Base fee in becks. The modified fee adds the operator delta.
    fee: u64,
    /// Serialized size in bytes.
    tx_size: u64,
    /// Approximate heap usage of this entry.
    usage_size: u64,
    /// Wall-clock entry time (unix seconds).
    time: i64,
    /// Chain height when the transaction entered the pool.
    entry_height: u64,
    /// Whether any input spends a coinbase output.
    spends_coinbase: bool,
    /// Signature checks the transaction requires.
    sig_checks: i64,
    /// Operator-assigned mining priority adjustment in becks.
    fee_delta: i64,
    /// Cached relative-locktime evaluation.
    lock_points: LockPoints,

    // Aggregates over this entry and every in-pool descendant. If this
    // entry is removed, all of these must go with it.
    count_with_descendants: u64,
    size_with_descendants: u64,
    fees_with_descendants: i64,
    sig_checks_with_descendants: i64,

    // Analogous aggregates over this entry and every in-pool ancestor.
    count_with_ancestors: u64,
    size_with_ancestors: u64,
    fees_with_ancestors: i64,
    sig_checks_with_ancestors: i64,

    /// In-pool transactions whose outputs this entry spends.
    parents: BTreeSet<Hash256>,
    /// In-pool transactions spending this entry's outputs.
    children: BTreeSet<Hash256>,

    /// Traversal generation when last visited.
    pub(crate) epoch_marker: u64,
}

impl MempoolEntry {
    /// Create an entry for a validated transaction.
    ///
    /// `fee` and `sig_checks` come from the validation layer; the pool does
    /// not re-derive them. Fails only if the transaction cannot be
    /// serialized to measure its size.
    pub fn new(
        tx: Arc<Transaction>,
        fee: u64,
        time: i64,
        entry_height: u64,
        spends_coinbase: bool,
        sig_checks: i64,
        lock_points: LockPoints,
    ) -> Result<Self, TransactionError> {
        let txid = tx.txid()?;
        let tx_size = tx.serialized_size()?;
        let usage_size = mem::size_of::<Self>() as u64 + tx_memory_usage(&tx);
        Ok(Self {
            tx,
            txid,
            fee,
            tx_size,
            usage_size,
            time,
            entry_height,
            spends_coinbase,
            sig_checks,
            fee_delta: 0,
            lock_points,
            count_with_descendants: 1,
            size_with_descendants: tx_size,
            fees_with_descendants: fee as i64,
            sig_checks_with_descendants: sig_checks,
            count_with_ancestors: 1,
            size_with_ancestors: tx_size,
            fees_with_ancestors: fee as i64,
            sig_checks_with_ancestors: sig_checks,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            epoch_marker: 0,
        })
    }

    pub fn tx(&self) -> &Arc<Transaction> {
        &self.tx
    }

    pub fn txid(&self) -> Hash256 {
        self.txid
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Base fee plus the operator fee delta.
    pub fn modified_fee(&self) -> i64 {
        self.fee as i64 + self.fee_delta
    }

    pub fn tx_size(&self) -> u64 {
        self.tx_size
    }

    pub fn tx_virtual_size(&self) -> u64 {
        virtual_size(self.tx_size, self.sig_checks)
    }

    pub fn usage_size(&self) -> u64 {
        self.usage_size
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn entry_height(&self) -> u64 {
        self.entry_height
    }

    pub fn spends_coinbase(&self) -> bool {
        self.spends_coinbase
    }

    pub fn sig_checks(&self) -> i64 {
        self.sig_checks
    }

    pub fn fee_delta(&self) -> i64 {
        self.fee_delta
    }

    pub fn lock_points(&self) -> &LockPoints {
        &self.lock_points
    }

    pub fn count_with_descendants(&self) -> u64 {
        self.count_with_descendants
    }

    pub fn size_with_descendants(&self) -> u64 {
        self.size_with_descendants
    }

    pub fn virtual_size_with_descendants(&self) -> u64 {
        virtual_size(self.size_with_descendants, self.sig_checks_with_descendants)
    }

    pub fn fees_with_descendants(&self) -> i64 {
        self.fees_with_descendants
    }

    pub fn sig_checks_with_descendants(&self) -> i64 {
        self.sig_checks_with_descendants
    }

    pub fn count_with_ancestors(&self) -> u64 {
        self.count_with_ancestors
    }

    pub fn size_with_ancestors(&self) -> u64 {
        self.size_with_ancestors
    }

    pub fn virtual_size_with_ancestors(&self) -> u64 {
        virtual_size(self.size_with_ancestors, self.sig_checks_with_ancestors)
    }

    pub fn fees_with_ancestors(&self) -> i64 {
        self.fees_with_ancestors
    }

    pub fn sig_checks_with_ancestors(&self) -> i64 {
        self.sig_checks_with_ancestors
    }

    /// In-pool direct parents, ordered by txid.
    pub fn parents(&self) -> &BTreeSet<Hash256> {
        &self.parents
    }

    /// In-pool direct children, ordered by txid.
    pub fn children(&self) -> &BTreeSet<Hash256> {
        &self.children
    }

    /// Caller-facing snapshot of this entry.
    pub fn info(&self) -> TxMempoolInfo {
        TxMempoolInfo {
            tx: Arc::clone(&self.tx),
            time: self.time,
            fee: self.fee,
            vsize: self.tx_virtual_size(),
            fee_delta: self.fee_delta,
        }
    }

    /// Adjust the descendant aggregates by the given deltas.
    pub(crate) fn update_descendant_state(
        &mut self,
        size: i64,
        fees: i64,
        count: i64,
        sig_checks: i64,
    ) {
        self.size_with_descendants = (self.size_with_descendants as i64 + size) as u64;
        self.fees_with_descendants += fees;
        self.count_with_descendants = (self.count_with_descendants as i64 + count) as u64;
        self.sig_checks_with_descendants += sig_checks;
        debug_assert!(self.count_with_descendants >= 1);
        debug_assert!(self.size_with_descendants >= self.tx_size);
    }

    /// Adjust the ancestor aggregates by the given deltas.
    pub(crate) fn update_ancestor_state(
        &mut self,
        size: i64,
        fees: i64,
        count: i64,
        sig_checks: i64,
    ) {
        self.size_with_ancestors = (self.size_with_ancestors as i64 + size) as u64;
        self.fees_with_ancestors += fees;
        self.count_with_ancestors = (self.count_with_ancestors as i64 + count) as u64;
        self.sig_checks_with_ancestors += sig_checks;
        debug_assert!(self.count_with_ancestors >= 1);
        debug_assert!(self.size_with_ancestors >= self.tx_size);
    }

    /// Replace the operator fee delta, keeping the self-inclusive aggregate
    /// fee sums in step.
    pub(crate) fn update_fee_delta(&mut self, fee_delta: i64) {
        let diff = fee_delta - self.fee_delta;
        self.fees_with_descendants += diff;
        self.fees_with_ancestors += diff;
        self.fee_delta = fee_delta;
    }

    /// Refresh the cached lock points after a reorg.
    pub(crate) fn update_lock_points(&mut self, lock_points: LockPoints) {
        self.lock_points = lock_points;
    }

    pub(crate) fn insert_parent(&mut self, parent: Hash256) -> bool {
        self.parents.insert(parent)
    }

    pub(crate) fn remove_parent(&mut self, parent: &Hash256) -> bool {
        self.parents.remove(parent)
    }

    pub(crate) fn insert_child(&mut self, child: Hash256) -> bool {
        self.children.insert(child)
    }

    pub(crate) fn remove_child(&mut self, child: &Hash256) -> bool {
        self.children.remove(child)
    }
}
