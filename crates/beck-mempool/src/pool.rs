//! The transaction memory pool.
//!
//! [`Mempool`] stores valid-according-to-the-current-best-chain transactions
//! that may be included in the next block. Entries are ordered four ways at
//! once (txid lookup, descendant feerate, ancestor feerate, entry time), and
//! every entry tracks its in-pool direct parents and children so the pool
//! can walk dependency closures without consulting the chain.
//!
//! For the feerate orderings to stay correct, aggregates over an entry's
//! ancestor and descendant sets are maintained incrementally: submission
//! updates every ancestor's descendant totals, and removal must first
//! compute the full dependent closure, update everything that survives, and
//! only then erase. Removing an intermediate link before the bookkeeping
//! pass would make the remaining graph unwalkable, which is why the staged
//! removal discipline in this module always runs link and aggregate updates
//! over the whole batch before the first entry is erased.
//!
//! The pool takes `&mut self` and is not internally synchronised; the node
//! wraps it in a `parking_lot::Mutex` and must acquire the chainstate lock
//! before the pool lock whenever it changes the chain tip, so that a locked
//! pool is always consistent with some recently-active chain. The
//! transactions-updated counter is atomic and readable through a shared
//! borrow; the block-template builder polls it to invalidate its cache
//! without waiting on a consistent walk.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, trace};

use beck_core::types::{Hash256, OutPoint, Transaction};
use beck_core::utxo::UtxoView;

use crate::config::{MempoolConfig, MempoolLimits};
use crate::entry::{
    LockPoints, MempoolEntry, RemovalReason, TransactionAncestry, TxMempoolInfo,
};
use crate::epoch::Epoch;
use crate::error::{MempoolError, MempoolResult};
use crate::feerate::{cmp_feerate, FeeRate};
use crate::index::EntryIndex;
use crate::rolling_fee::RollingFeeRate;

/// Approximate bookkeeping cost of one parent/child link endpoint.
const LINK_USAGE: u64 = 48;
/// Approximate per-entry overhead of the primary map and the orderings.
const MAP_NODE_USAGE: u64 = 96;
/// Approximate per-node overhead of the auxiliary maps.
const AUX_NODE_USAGE: u64 = 64;

/// Synchronous pool event subscriber.
///
/// Observers run inline while the pool is being mutated; the exclusive
/// borrow makes calling back into the pool impossible, which is exactly the
/// contract they must honour.
pub trait MempoolObserver: Send {
    /// A transaction entered the pool.
    fn transaction_added(&mut self, tx: &Arc<Transaction>, sequence: u64) {
        let _ = (tx, sequence);
    }

    /// A transaction left the pool. Within a batch removal, descendants are
    /// reported before their ancestors.
    fn transaction_removed(&mut self, tx: &Arc<Transaction>, reason: RemovalReason, sequence: u64) {
        let _ = (tx, reason, sequence);
    }
}

/// Verdict of the consensus layer's post-reorg re-check of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgCheck {
    /// Still final and mature on the new tip.
    Keep,
    /// Still valid; cache these recomputed lock points.
    KeepWithLockPoints(LockPoints),
    /// No longer valid; remove the entry and its descendants.
    Remove,
}

/// In-memory pool of unconfirmed transactions.
pub struct Mempool {
    config: MempoolConfig,
    store: EntryIndex,
    /// Spent outpoint → txid of the pool transaction spending it.
    next_tx: HashMap<OutPoint, Hash256>,
    /// Operator fee deltas, kept even for transactions not currently pooled.
    deltas: HashMap<Hash256, i64>,
    /// Locally submitted transactions awaiting relay confirmation.
    unbroadcast: HashSet<Hash256>,
    epoch: Epoch,
    rolling_fee: RollingFeeRate,
    /// Sum of all pool transactions' serialized sizes.
    total_tx_size: u64,
    /// Sum of all pool transactions' base fees (not modified fees).
    total_fee: u64,
    /// Approximate heap usage of the entries and their link sets.
    inner_usage: u64,
    /// Monotone event counter; every insertion and removal takes one.
    sequence: u64,
    /// Bumped on every pool change; polled by the template builder.
    transactions_updated: AtomicU32,
    check_counter: u64,
    is_loaded: bool,
    observers: Vec<Box<dyn MempoolObserver>>,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MempoolConfig::default())
    }
}

impl Mempool {
    /// Create an empty pool with the given configuration.
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            store: EntryIndex::default(),
            next_tx: HashMap::new(),
            deltas: HashMap::new(),
            unbroadcast: HashSet::new(),
            epoch: Epoch::default(),
            rolling_fee: RollingFeeRate::new(),
            total_tx_size: 0,
            total_fee: 0,
            inner_usage: 0,
            sequence: 1,
            transactions_updated: AtomicU32::new(0),
            check_counter: 0,
            is_loaded: false,
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// Attach an inline event subscriber.
    pub fn register_observer(&mut self, observer: Box<dyn MempoolObserver>) {
        self.observers.push(observer);
    }

    // ------------------------------------------------------------------
    // Insertion engine
    // ------------------------------------------------------------------

    /// Admit a validated transaction, computing its in-pool ancestry and
    /// enforcing the configured chain limits.
    ///
    /// The caller has already verified the transaction against consensus
    /// and supplied fee and sigcheck totals on the entry. A conflicting
    /// spend of an already-spent outpoint is rejected; replacement is the
    /// caller's policy (remove the incumbent with
    /// [`RemovalReason::Replaced`] first).
    pub fn submit(&mut self, entry: MempoolEntry) -> MempoolResult<()> {
        let limits = self.config.limits.clone();
        let ancestors = self.compute_ancestors(&entry, &limits)?;
        self.submit_with_ancestors(entry, ancestors)
    }

    /// Admit a transaction whose ancestor set the caller already computed
    /// (and validated against the limits) via [`Mempool::compute_ancestors`].
    pub fn submit_with_ancestors(
        &mut self,
        mut entry: MempoolEntry,
        ancestors: BTreeSet<Hash256>,
    ) -> MempoolResult<()> {
        let txid = entry.txid();
        if self.store.contains(&txid) {
            return Err(MempoolError::Duplicate(txid.to_string()));
        }
        for input in &entry.tx().inputs {
            if let Some(existing) = self.next_tx.get(&input.previous_output) {
                return Err(MempoolError::Conflict {
                    existing: existing.to_string(),
                    outpoint: input.previous_output.to_string(),
                });
            }
        }

        // A delta registered before arrival applies now, before the entry
        // is scored into the orderings.
        if let Some(&delta) = self.deltas.get(&txid) {
            if delta != 0 {
                entry.update_fee_delta(delta);
            }
        }

        self.total_tx_size += entry.tx_size();
        self.total_fee += entry.fee();
        self.inner_usage += entry.usage_size();

        let tx = Arc::clone(entry.tx());
        let parents: BTreeSet<Hash256> = tx
            .inputs
            .iter()
            .map(|input| input.previous_output.txid)
            .filter(|parent| self.store.contains(parent))
            .collect();

        for input in &tx.inputs {
            self.next_tx.insert(input.previous_output.clone(), txid);
        }
        self.store.insert(entry);

        for parent in &parents {
            self.update_parent(txid, *parent, true);
        }
        self.update_ancestors_of(true, &txid, &ancestors);
        self.update_entry_for_ancestors(&txid, &ancestors);

        self.transactions_updated.fetch_add(1, AtomicOrdering::Relaxed);
        self.notify_added(tx);
        trace!(%txid, "transaction added to pool");
        Ok(())
    }

    /// Compute the transitive in-pool ancestors of a not-yet-pooled entry,
    /// enforcing the chain limits.
    ///
    /// BFS from the entry's direct in-pool parents. Fails on the first
    /// limit violation: the entry's own ancestor count/size, or any
    /// ancestor's descendant count/size as it would stand after admission.
    pub fn compute_ancestors(
        &self,
        entry: &MempoolEntry,
        limits: &MempoolLimits,
    ) -> MempoolResult<BTreeSet<Hash256>> {
        let staged: BTreeSet<Hash256> = entry
            .tx()
            .inputs
            .iter()
            .map(|input| input.previous_output.txid)
            .filter(|parent| self.store.contains(parent))
            .collect();
        self.calculate_ancestors_and_check_limits(entry.tx_size(), 1, staged, limits)
    }

    /// Apply the chain limits to a package of transactions not yet in the
    /// pool, treating the union of their in-pool parents as shared
    /// ancestry. Rejects the whole package on any violation.
    pub fn check_package_limits(
        &self,
        package: &[Arc<Transaction>],
        limits: &MempoolLimits,
    ) -> MempoolResult<()> {
        let mut total_size = 0u64;
        let mut staged = BTreeSet::new();
        for tx in package {
            total_size += tx
                .serialized_size()
                .map_err(|e| MempoolError::Serialization(e.to_string()))?;
            for input in &tx.inputs {
                let parent = input.previous_output.txid;
                if self.store.contains(&parent) {
                    staged.insert(parent);
                }
            }
        }
        self.calculate_ancestors_and_check_limits(total_size, package.len() as u64, staged, limits)
            .map(|_| ())
    }

    fn calculate_ancestors_and_check_limits(
        &self,
        entry_size: u64,
        entry_count: u64,
        mut staged: BTreeSet<Hash256>,
        limits: &MempoolLimits,
    ) -> MempoolResult<BTreeSet<Hash256>> {
        let mut ancestors: BTreeSet<Hash256> = BTreeSet::new();
        let mut total_size_with_ancestors = entry_size;

        while let Some(stage_id) = staged.pop_first() {
            let stage = self
                .store
                .get(&stage_id)
                .ok_or_else(|| MempoolError::MissingParent(stage_id.to_string()))?;
            ancestors.insert(stage_id);
            total_size_with_ancestors += stage.tx_size();

            if stage.size_with_descendants() + entry_size > limits.descendant_size {
                return Err(MempoolError::DescendantSize {
                    ancestor: stage_id.to_string(),
                    limit: limits.descendant_size,
                });
            }
            if stage.count_with_descendants() + entry_count > limits.descendant_count {
                return Err(MempoolError::DescendantCount {
                    ancestor: stage_id.to_string(),
                    limit: limits.descendant_count,
                });
            }
            if total_size_with_ancestors > limits.ancestor_size {
                return Err(MempoolError::AncestorSize { limit: limits.ancestor_size });
            }

            for parent in stage.parents() {
                if !ancestors.contains(parent) {
                    staged.insert(*parent);
                }
            }
            if ancestors.len() as u64 + staged.len() as u64 + entry_count > limits.ancestor_count {
                return Err(MempoolError::AncestorCount { limit: limits.ancestor_count });
            }
        }
        Ok(ancestors)
    }

    // ------------------------------------------------------------------
    // Removal engine
    // ------------------------------------------------------------------

    /// Remove a transaction and every in-pool descendant.
    pub fn remove_recursive(&mut self, txid: &Hash256, reason: RemovalReason) {
        if !self.store.contains(txid) {
            return;
        }
        let mut stage = BTreeSet::new();
        self.calculate_descendants(*txid, &mut stage);
        self.remove_staged(&stage, false, reason);
    }

    /// Reconcile the pool with a newly connected block: erase included
    /// transactions (descendants stay, with adjusted ancestry), evict
    /// anything conflicting with an in-block spend, and drop stale
    /// prioritisation. Also arms the rolling-fee decay.
    pub fn remove_for_block(&mut self, txs: &[Arc<Transaction>], height: u64, now: i64) {
        let mut removed = 0usize;
        for tx in txs {
            let Ok(txid) = tx.txid() else { continue };
            if self.store.contains(&txid) {
                let stage: BTreeSet<Hash256> = [txid].into_iter().collect();
                self.remove_staged(&stage, true, RemovalReason::Block);
                removed += 1;
            }
            self.remove_conflicts(tx);
            self.clear_prioritisation(&txid);
        }
        self.rolling_fee.on_block_connected(now);
        if removed > 0 {
            debug!(height, removed, "removed mined transactions from pool");
        }
    }

    /// Evict any pool transaction spending an outpoint this transaction
    /// spends.
    pub fn remove_conflicts(&mut self, tx: &Transaction) {
        let txid = tx.txid().ok();
        for input in &tx.inputs {
            let Some(conflict) = self.next_tx.get(&input.previous_output).copied() else {
                continue;
            };
            if Some(conflict) != txid {
                self.remove_recursive(&conflict, RemovalReason::Conflict);
            }
        }
    }

    /// After a reorg, apply the consensus layer's finality/maturity
    /// re-check to every entry. Entries the filter rejects are removed
    /// recursively; entries it revalidates may carry refreshed lock points.
    pub fn remove_for_reorg(&mut self, mut filter: impl FnMut(&MempoolEntry) -> ReorgCheck) {
        let txids = self.store.txids();
        let mut to_remove = Vec::new();
        for txid in txids {
            let verdict = match self.store.get(&txid) {
                Some(entry) => filter(entry),
                None => continue,
            };
            match verdict {
                ReorgCheck::Remove => to_remove.push(txid),
                ReorgCheck::KeepWithLockPoints(lp) => {
                    self.store.modify(&txid, |e| e.update_lock_points(lp));
                }
                ReorgCheck::Keep => {}
            }
        }

        let mut stage = BTreeSet::new();
        for txid in &to_remove {
            self.calculate_descendants(*txid, &mut stage);
        }
        if !stage.is_empty() {
            debug!(count = stage.len(), "removing transactions invalidated by reorg");
        }
        self.remove_staged(&stage, false, RemovalReason::Reorg);
    }

    /// Populate `out` with the transaction and all in-pool descendants.
    ///
    /// Entries already in `out` are treated as fully expanded and not
    /// walked again.
    pub fn calculate_descendants(&mut self, txid: Hash256, out: &mut BTreeSet<Hash256>) {
        if !self.store.contains(&txid) {
            return;
        }
        let guard = self.epoch.guard();
        for known in out.iter() {
            self.store.visit(known, &guard);
        }
        let mut stack = vec![txid];
        while let Some(current) = stack.pop() {
            if self.store.visit(&current, &guard) {
                continue;
            }
            out.insert(current);
            if let Some(entry) = self.store.get(&current) {
                stack.extend(entry.children().iter().copied());
            }
        }
    }

    /// Remove a dependency-closed batch.
    ///
    /// `stage` must contain every in-pool descendant of its members unless
    /// `update_descendants` is set (block inclusion), in which case
    /// surviving descendants get their ancestor totals adjusted instead.
    fn remove_staged(
        &mut self,
        stage: &BTreeSet<Hash256>,
        update_descendants: bool,
        reason: RemovalReason,
    ) {
        if stage.is_empty() {
            return;
        }
        self.update_for_remove_from_mempool(stage, update_descendants);

        if matches!(reason, RemovalReason::SizeLimit | RemovalReason::Replaced) {
            let mut fees: i64 = 0;
            let mut vsize: u64 = 0;
            for txid in stage {
                if let Some(entry) = self.store.get(txid) {
                    fees += entry.modified_fee();
                    vsize += entry.tx_virtual_size();
                }
            }
            let rate = FeeRate::from_fee_and_size(fees.max(0) as u64, vsize)
                .saturating_add(self.config.incremental_relay_fee);
            if self.rolling_fee.track_package_removed(rate) {
                debug!(%rate, %reason, "rolling minimum fee bumped");
            }
        }

        // Descendants are erased (and reported) before their ancestors: a
        // descendant always has the strictly larger ancestor count.
        let mut order: Vec<Hash256> = stage.iter().copied().collect();
        order.sort_by_key(|txid| {
            std::cmp::Reverse(
                self.store
                    .get(txid)
                    .map(|e| e.count_with_ancestors())
                    .unwrap_or(0),
            )
        });
        for txid in order {
            self.remove_unchecked(&txid, reason);
        }
    }

    /// Run the link and aggregate bookkeeping for a batch that is about to
    /// be erased. Must complete for the whole batch before the first erase:
    /// ancestor walks use parent links that later steps sever.
    fn update_for_remove_from_mempool(
        &mut self,
        stage: &BTreeSet<Hash256>,
        update_descendants: bool,
    ) {
        if update_descendants {
            for txid in stage {
                let mut descendants = BTreeSet::new();
                self.calculate_descendants(*txid, &mut descendants);
                descendants.remove(txid);
                let Some((size, fees, sig_checks)) = self
                    .store
                    .get(txid)
                    .map(|e| (e.tx_size() as i64, e.modified_fee(), e.sig_checks()))
                else {
                    continue;
                };
                for descendant in &descendants {
                    self.store.modify(descendant, |e| {
                        e.update_ancestor_state(-size, -fees, -1, -sig_checks)
                    });
                }
            }
        }
        for txid in stage {
            let ancestors = self.ancestors_of(txid);
            self.update_ancestors_of(false, txid, &ancestors);
        }
        for txid in stage {
            self.update_children_for_removal(txid);
        }
    }

    /// Erase one entry from every index and update the global accounting.
    fn remove_unchecked(&mut self, txid: &Hash256, reason: RemovalReason) {
        let Some(entry) = self.store.remove(txid) else { return };
        for input in &entry.tx().inputs {
            self.next_tx.remove(&input.previous_output);
        }
        self.remove_unbroadcast_internal(txid, true);
        self.total_tx_size -= entry.tx_size();
        self.total_fee -= entry.fee();
        self.inner_usage -= entry.usage_size()
            + (entry.parents().len() + entry.children().len()) as u64 * LINK_USAGE;
        self.transactions_updated.fetch_add(1, AtomicOrdering::Relaxed);
        self.notify_removed(Arc::clone(entry.tx()), reason);
    }

    // ------------------------------------------------------------------
    // Graph bookkeeping
    // ------------------------------------------------------------------

    /// Transitive in-pool ancestors of a pooled transaction, excluding it.
    fn ancestors_of(&self, txid: &Hash256) -> BTreeSet<Hash256> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<Hash256> = match self.store.get(txid) {
            Some(entry) => entry.parents().iter().copied().collect(),
            None => return out,
        };
        while let Some(current) = stack.pop() {
            if out.insert(current) {
                if let Some(entry) = self.store.get(&current) {
                    stack.extend(entry.parents().iter().copied());
                }
            }
        }
        out
    }

    /// Transitive in-pool descendants, excluding the transaction. Used only
    /// by the self-check: an independent recomputation that does not share
    /// the epoch machinery it is validating.
    fn descendants_of(&self, txid: &Hash256) -> BTreeSet<Hash256> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<Hash256> = match self.store.get(txid) {
            Some(entry) => entry.children().iter().copied().collect(),
            None => return out,
        };
        while let Some(current) = stack.pop() {
            if out.insert(current) {
                if let Some(entry) = self.store.get(&current) {
                    stack.extend(entry.children().iter().copied());
                }
            }
        }
        out
    }

    /// Add or remove `txid` as a child of each of its direct parents, and
    /// fold its totals into (or out of) every ancestor's descendant state.
    fn update_ancestors_of(&mut self, add: bool, txid: &Hash256, ancestors: &BTreeSet<Hash256>) {
        let Some((parents, size, fees, sig_checks)) = self.store.get(txid).map(|e| {
            (
                e.parents().iter().copied().collect::<Vec<_>>(),
                e.tx_size() as i64,
                e.modified_fee(),
                e.sig_checks(),
            )
        }) else {
            return;
        };
        for parent in parents {
            self.update_child(parent, *txid, add);
        }
        let sign: i64 = if add { 1 } else { -1 };
        for ancestor in ancestors {
            self.store.modify(ancestor, |e| {
                e.update_descendant_state(sign * size, sign * fees, sign, sign * sig_checks)
            });
        }
    }

    /// Fold the ancestor set's totals into a freshly inserted entry.
    fn update_entry_for_ancestors(&mut self, txid: &Hash256, ancestors: &BTreeSet<Hash256>) {
        let mut size: i64 = 0;
        let mut count: i64 = 0;
        let mut fees: i64 = 0;
        let mut sig_checks: i64 = 0;
        for ancestor in ancestors {
            if let Some(entry) = self.store.get(ancestor) {
                size += entry.tx_size() as i64;
                count += 1;
                fees += entry.modified_fee();
                sig_checks += entry.sig_checks();
            }
        }
        self.store
            .modify(txid, |e| e.update_ancestor_state(size, fees, count, sig_checks));
    }

    /// Sever `txid` from the parent sets of all its direct children.
    fn update_children_for_removal(&mut self, txid: &Hash256) {
        let children: Vec<Hash256> = match self.store.get(txid) {
            Some(entry) => entry.children().iter().copied().collect(),
            None => return,
        };
        for child in children {
            self.update_parent(child, *txid, false);
        }
    }

    fn update_parent(&mut self, child: Hash256, parent: Hash256, add: bool) {
        let mut changed = false;
        self.store.modify(&child, |e| {
            changed = if add { e.insert_parent(parent) } else { e.remove_parent(&parent) };
        });
        if changed {
            if add {
                self.inner_usage += LINK_USAGE;
            } else {
                self.inner_usage -= LINK_USAGE;
            }
        }
    }

    fn update_child(&mut self, parent: Hash256, child: Hash256, add: bool) {
        let mut changed = false;
        self.store.modify(&parent, |e| {
            changed = if add { e.insert_child(child) } else { e.remove_child(&child) };
        });
        if changed {
            if add {
                self.inner_usage += LINK_USAGE;
            } else {
                self.inner_usage -= LINK_USAGE;
            }
        }
    }

    // ------------------------------------------------------------------
    // Reorg fix-up
    // ------------------------------------------------------------------

    /// Repair descendant and ancestor state after transactions from
    /// disconnected blocks were re-admitted.
    ///
    /// Unlike a normal submission, a re-admitted transaction may have
    /// children that were already in the pool; until this runs, those links
    /// and aggregates are missing. Descendants whose repaired ancestry
    /// exceeds the given limits are not fixed in place: they are returned
    /// for the caller to remove recursively.
    pub fn update_transactions_from_block(
        &mut self,
        txids: &[Hash256],
        ancestor_size_limit: u64,
        ancestor_count_limit: u64,
    ) -> BTreeSet<Hash256> {
        let exclude: HashSet<Hash256> = txids.iter().copied().collect();
        let mut cached_descendants: HashMap<Hash256, BTreeSet<Hash256>> = HashMap::new();
        let mut to_remove = BTreeSet::new();

        // Later block transactions first, so a parent's walk can reuse the
        // cached closures of its children.
        for txid in txids.iter().rev() {
            if !self.store.contains(txid) {
                continue;
            }
            // Relink children that stayed in the pool while this
            // transaction was confirmed. Children that are themselves in
            // the re-admitted set were linked by their own submission.
            let n_outputs = self
                .store
                .get(txid)
                .map(|e| e.tx().outputs.len() as u64)
                .unwrap_or(0);
            for index in 0..n_outputs {
                let outpoint = OutPoint::new(*txid, index);
                let Some(child) = self.next_tx.get(&outpoint).copied() else { continue };
                if !exclude.contains(&child) && self.store.contains(&child) {
                    self.update_child(*txid, child, true);
                    self.update_parent(child, *txid, true);
                }
            }
            self.update_for_descendants(
                *txid,
                &mut cached_descendants,
                &exclude,
                &mut to_remove,
                ancestor_size_limit,
                ancestor_count_limit,
            );
        }
        to_remove
    }

    /// Repair one re-admitted transaction's descendant totals, and each
    /// descendant's ancestor totals. Flags descendants that now exceed the
    /// ancestor limits.
    fn update_for_descendants(
        &mut self,
        update_txid: Hash256,
        cached_descendants: &mut HashMap<Hash256, BTreeSet<Hash256>>,
        exclude: &HashSet<Hash256>,
        to_remove: &mut BTreeSet<Hash256>,
        ancestor_size_limit: u64,
        ancestor_count_limit: u64,
    ) {
        let mut all_descendants = BTreeSet::new();
        {
            let guard = self.epoch.guard();
            let mut stage: Vec<Hash256> = match self.store.get(&update_txid) {
                Some(entry) => entry.children().iter().copied().collect(),
                None => return,
            };
            while let Some(current) = stage.pop() {
                if self.store.visit(&current, &guard) {
                    continue;
                }
                all_descendants.insert(current);
                if let Some(closure) = cached_descendants.get(&current) {
                    // The cache line already holds this child's whole
                    // closure; no need to walk past it.
                    for descendant in closure {
                        all_descendants.insert(*descendant);
                        self.store.visit(descendant, &guard);
                    }
                } else if let Some(entry) = self.store.get(&current) {
                    stage.extend(entry.children().iter().copied());
                }
            }
        }

        let Some((upd_size, upd_fees, upd_sig_checks)) = self
            .store
            .get(&update_txid)
            .map(|e| (e.tx_size() as i64, e.modified_fee(), e.sig_checks()))
        else {
            return;
        };

        let mut modify_size: i64 = 0;
        let mut modify_fees: i64 = 0;
        let mut modify_count: i64 = 0;
        let mut modify_sig_checks: i64 = 0;
        let mut cache_line = BTreeSet::new();

        for descendant in &all_descendants {
            if exclude.contains(descendant) {
                continue;
            }
            let Some(entry) = self.store.get(descendant) else { continue };
            modify_size += entry.tx_size() as i64;
            modify_fees += entry.modified_fee();
            modify_count += 1;
            modify_sig_checks += entry.sig_checks();
            cache_line.insert(*descendant);

            self.store.modify(descendant, |e| {
                e.update_ancestor_state(upd_size, upd_fees, 1, upd_sig_checks)
            });
            if let Some(entry) = self.store.get(descendant) {
                if entry.count_with_ancestors() > ancestor_count_limit
                    || entry.size_with_ancestors() > ancestor_size_limit
                {
                    to_remove.insert(*descendant);
                }
            }
        }
        if modify_count > 0 {
            self.store.modify(&update_txid, |e| {
                e.update_descendant_state(modify_size, modify_fees, modify_count, modify_sig_checks)
            });
        }
        cached_descendants.insert(update_txid, cache_line);
    }

    // ------------------------------------------------------------------
    // Size and age management
    // ------------------------------------------------------------------

    /// Remove every transaction older than `cutoff`, along with all
    /// dependents. Returns the number removed.
    pub fn expire(&mut self, cutoff: i64) -> usize {
        let mut roots = Vec::new();
        for entry in self.store.iter_by_entry_time() {
            if entry.time() >= cutoff {
                break;
            }
            roots.push(entry.txid());
        }
        let mut stage = BTreeSet::new();
        for txid in &roots {
            self.calculate_descendants(*txid, &mut stage);
        }
        let removed = stage.len();
        self.remove_staged(&stage, false, RemovalReason::Expiry);
        removed
    }

    /// Evict lowest-descendant-score packages until memory usage fits.
    ///
    /// Each eviction raises the rolling admission floor to the evicted
    /// package's feerate plus the incremental relay fee. If
    /// `no_spends_remaining` is given it collects outpoints spent by
    /// evicted transactions whose funding transaction is not in the pool,
    /// coins the caller may now drop from its cache.
    pub fn trim_to_size(
        &mut self,
        size_limit: u64,
        mut no_spends_remaining: Option<&mut Vec<OutPoint>>,
    ) {
        let mut removed_count = 0usize;
        let mut max_removed_rate = FeeRate::ZERO;

        while !self.store.is_empty() && self.dynamic_memory_usage() > size_limit {
            let Some((victim, pkg_fees, pkg_size)) =
                self.store.iter_by_descendant_score().next().map(|e| {
                    (e.txid(), e.fees_with_descendants(), e.virtual_size_with_descendants())
                })
            else {
                break;
            };
            let removed_rate = FeeRate::from_fee_and_size(pkg_fees.max(0) as u64, pkg_size)
                .saturating_add(self.config.incremental_relay_fee);
            max_removed_rate = max_removed_rate.max(removed_rate);

            let mut stage = BTreeSet::new();
            self.calculate_descendants(victim, &mut stage);
            removed_count += stage.len();

            let mut spent_inputs = Vec::new();
            if no_spends_remaining.is_some() {
                for txid in &stage {
                    if let Some(entry) = self.store.get(txid) {
                        spent_inputs
                            .extend(entry.tx().inputs.iter().map(|i| i.previous_output.clone()));
                    }
                }
            }

            self.remove_staged(&stage, false, RemovalReason::SizeLimit);

            if let Some(out) = &mut no_spends_remaining {
                for outpoint in spent_inputs {
                    if !self.store.contains(&outpoint.txid) {
                        out.push(outpoint);
                    }
                }
            }
        }

        if removed_count > 0 {
            debug!(
                removed = removed_count,
                max_feerate = %max_removed_rate,
                "trimmed pool to size limit"
            );
        }
    }

    /// Periodic maintenance: expire by the configured age, then trim to the
    /// configured byte limit. Returns outpoints freed for cache eviction.
    pub fn limit_size(&mut self, now: i64) -> Vec<OutPoint> {
        let expired = self.expire(now - self.config.expiry_secs);
        if expired > 0 {
            debug!(expired, "expired old transactions from pool");
        }
        let mut no_spends = Vec::new();
        let limit = self.config.max_size_bytes;
        self.trim_to_size(limit, Some(&mut no_spends));
        no_spends
    }

    /// The decayed rolling admission floor as of `now`.
    pub fn get_min_fee(&mut self, now: i64) -> FeeRate {
        let usage = self.dynamic_memory_usage();
        let size_limit = self.config.max_size_bytes;
        let incremental = self.config.incremental_relay_fee;
        self.rolling_fee.current(now, usage, size_limit, incremental)
    }

    /// Admission threshold: the configured relay minimum or the rolling
    /// floor, whichever is higher.
    pub fn estimate_fee(&mut self, now: i64) -> FeeRate {
        self.config.min_relay_fee.max(self.get_min_fee(now))
    }

    // ------------------------------------------------------------------
    // Prioritisation
    // ------------------------------------------------------------------

    /// Adjust a transaction's mining priority by `delta` becks.
    ///
    /// The delta persists by txid even when the transaction is not in the
    /// pool, and applies on a later arrival. For a pooled transaction the
    /// modified-fee aggregates of its ancestors and descendants move too.
    pub fn prioritise(&mut self, txid: &Hash256, delta: i64) {
        let total = {
            let slot = self.deltas.entry(*txid).or_insert(0);
            *slot += delta;
            *slot
        };
        if self.store.contains(txid) {
            self.store.modify(txid, |e| e.update_fee_delta(total));

            let ancestors = self.ancestors_of(txid);
            for ancestor in &ancestors {
                self.store
                    .modify(ancestor, |e| e.update_descendant_state(0, delta, 0, 0));
            }
            let mut descendants = BTreeSet::new();
            self.calculate_descendants(*txid, &mut descendants);
            descendants.remove(txid);
            for descendant in &descendants {
                self.store
                    .modify(descendant, |e| e.update_ancestor_state(0, delta, 0, 0));
            }
            self.transactions_updated.fetch_add(1, AtomicOrdering::Relaxed);
        }
        debug!(%txid, delta, total, "prioritised transaction");
    }

    /// Fold any registered delta for `txid` into the caller's running fee.
    pub fn apply_delta(&self, txid: &Hash256, fee: &mut i64) {
        if let Some(delta) = self.deltas.get(txid) {
            *fee += delta;
        }
    }

    /// Forget a persistent fee delta.
    pub fn clear_prioritisation(&mut self, txid: &Hash256) {
        self.deltas.remove(txid);
    }

    // ------------------------------------------------------------------
    // Unbroadcast tracking
    // ------------------------------------------------------------------

    /// Track a locally submitted transaction until relay is confirmed.
    /// Ignored unless the transaction is in the pool.
    pub fn add_unbroadcast(&mut self, txid: &Hash256) {
        if self.store.contains(txid) {
            self.unbroadcast.insert(*txid);
        }
    }

    /// The transaction was seen coming back through the relay path.
    pub fn remove_unbroadcast(&mut self, txid: &Hash256) {
        self.remove_unbroadcast_internal(txid, false);
    }

    fn remove_unbroadcast_internal(&mut self, txid: &Hash256, unchecked: bool) {
        if self.unbroadcast.remove(txid) {
            if unchecked {
                debug!(%txid, "removed from unbroadcast set before relay confirmation");
            } else {
                debug!(%txid, "removed from unbroadcast set");
            }
        }
    }

    /// Snapshot of the unbroadcast set.
    pub fn get_unbroadcast(&self) -> HashSet<Hash256> {
        self.unbroadcast.clone()
    }

    pub fn is_unbroadcast(&self, txid: &Hash256) -> bool {
        self.unbroadcast.contains(txid)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn exists(&self, txid: &Hash256) -> bool {
        self.store.contains(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<Arc<Transaction>> {
        self.store.get(txid).map(|e| Arc::clone(e.tx()))
    }

    /// Borrow the full entry. Valid only while the pool is borrowed; any
    /// mutation invalidates it.
    pub fn entry(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.store.get(txid)
    }

    pub fn info(&self, txid: &Hash256) -> Option<TxMempoolInfo> {
        self.store.get(txid).map(|e| e.info())
    }

    /// Every entry's info, ordered by ancestor count then relay score.
    pub fn info_all(&self) -> Vec<TxMempoolInfo> {
        self.sorted_by_depth_and_score()
            .into_iter()
            .map(|e| e.info())
            .collect()
    }

    /// All txids in relay order (ancestor count, then fee/size on the
    /// unmodified fee).
    pub fn query_txids(&self) -> Vec<Hash256> {
        self.sorted_by_depth_and_score()
            .into_iter()
            .map(|e| e.txid())
            .collect()
    }

    /// Relay ordering: does `a` sort before `b`? Missing transactions sort
    /// last.
    pub fn compare_depth_and_score(&self, a: &Hash256, b: &Hash256) -> bool {
        let Some(entry_a) = self.store.get(a) else { return false };
        let Some(entry_b) = self.store.get(b) else { return true };
        match entry_a
            .count_with_ancestors()
            .cmp(&entry_b.count_with_ancestors())
        {
            std::cmp::Ordering::Equal => {
                cmp_relay_score(entry_a, entry_b) == std::cmp::Ordering::Less
            }
            other => other == std::cmp::Ordering::Less,
        }
    }

    /// Whether an outpoint is spent by a pool transaction.
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.next_tx.contains_key(outpoint)
    }

    /// The pool transaction spending `outpoint`, if any.
    pub fn get_conflict_tx(&self, outpoint: &OutPoint) -> Option<Arc<Transaction>> {
        let txid = self.next_tx.get(outpoint)?;
        self.get(txid)
    }

    /// True when none of the transaction's inputs are supplied by the pool,
    /// so it could be mined without any pool companion.
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        !tx.inputs
            .iter()
            .any(|input| self.store.contains(&input.previous_output.txid))
    }

    pub fn size(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Sum of serialized sizes of all pool transactions.
    pub fn total_tx_size(&self) -> u64 {
        self.total_tx_size
    }

    /// Sum of base fees of all pool transactions.
    pub fn total_fee(&self) -> u64 {
        self.total_fee
    }

    /// Approximate total heap usage of the pool and its indexes.
    pub fn dynamic_memory_usage(&self) -> u64 {
        self.inner_usage
            + self.store.len() as u64 * MAP_NODE_USAGE
            + self.next_tx.len() as u64 * AUX_NODE_USAGE
            + (self.deltas.len() + self.unbroadcast.len()) as u64 * AUX_NODE_USAGE
    }

    /// Cached ancestry statistics for a pooled transaction.
    pub fn get_transaction_ancestry(&self, txid: &Hash256) -> Option<TransactionAncestry> {
        self.store.get(txid).map(|e| TransactionAncestry {
            ancestor_count: e.count_with_ancestors(),
            descendant_count: e.count_with_descendants(),
            ancestor_size: e.size_with_ancestors(),
            ancestor_fees: e.fees_with_ancestors(),
        })
    }

    /// Mining order: best ancestor score first. The template builder polls
    /// [`Mempool::transactions_updated`] to know when a previous walk went
    /// stale.
    pub fn iter_by_ancestor_score(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.store.iter_by_ancestor_score()
    }

    /// Eviction order: worst descendant score first.
    pub fn iter_by_descendant_score(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.store.iter_by_descendant_score()
    }

    /// Expiry order: oldest entry first.
    pub fn iter_by_entry_time(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.store.iter_by_entry_time()
    }

    /// Number of pool changes since creation. Needs only a shared borrow.
    pub fn transactions_updated(&self) -> u32 {
        self.transactions_updated.load(AtomicOrdering::Relaxed)
    }

    /// External bump of the update counter (e.g. after a chain tip change
    /// that affects template validity without touching the pool).
    pub fn add_transactions_updated(&self, n: u32) {
        self.transactions_updated.fetch_add(n, AtomicOrdering::Relaxed);
    }

    /// Next event sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether initial load (from a snapshot or peers) has finished.
    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn set_is_loaded(&mut self, loaded: bool) {
        self.is_loaded = loaded;
    }

    /// Drop every entry. Operator fee deltas survive: they apply to later
    /// arrivals of the same txids.
    pub fn clear(&mut self) {
        self.store = EntryIndex::default();
        self.next_tx.clear();
        self.unbroadcast.clear();
        self.total_tx_size = 0;
        self.total_fee = 0;
        self.inner_usage = 0;
        self.rolling_fee = RollingFeeRate::new();
        self.transactions_updated.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// All pool transactions in a parents-first order.
    pub(crate) fn topological_txs(&self) -> Vec<Arc<Transaction>> {
        let mut entries: Vec<&MempoolEntry> = self.store.iter().collect();
        entries.sort_by(|a, b| {
            a.count_with_ancestors()
                .cmp(&b.count_with_ancestors())
                .then_with(|| a.time().cmp(&b.time()))
                .then_with(|| a.txid().cmp(&b.txid()))
        });
        entries.into_iter().map(|e| Arc::clone(e.tx())).collect()
    }

    fn sorted_by_depth_and_score(&self) -> Vec<&MempoolEntry> {
        let mut entries: Vec<&MempoolEntry> = self.store.iter().collect();
        entries.sort_by(|a, b| {
            a.count_with_ancestors()
                .cmp(&b.count_with_ancestors())
                .then_with(|| cmp_relay_score(a, b))
        });
        entries
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    fn notify_added(&mut self, tx: Arc<Transaction>) {
        let sequence = self.sequence;
        self.sequence += 1;
        for observer in self.observers.iter_mut() {
            observer.transaction_added(&tx, sequence);
        }
    }

    fn notify_removed(&mut self, tx: Arc<Transaction>, reason: RemovalReason) {
        let sequence = self.sequence;
        self.sequence += 1;
        for observer in self.observers.iter_mut() {
            observer.transaction_removed(&tx, reason, sequence);
        }
    }

    // ------------------------------------------------------------------
    // Self-check
    // ------------------------------------------------------------------

    /// Recompute every invariant from scratch and assert it.
    ///
    /// Sampled: runs once per `check_ratio` calls (0 disables). Full
    /// checking on every mutation would make acceptance quadratic in the
    /// pool size, so production configs keep this off and tests set the
    /// ratio to 1.
    pub fn check(&mut self, view: &impl UtxoView, spend_height: u64) {
        if self.config.check_ratio == 0 {
            return;
        }
        self.check_counter += 1;
        if self.check_counter % self.config.check_ratio as u64 != 0 {
            return;
        }

        trace!(
            size = self.store.len(),
            usage = self.inner_usage,
            "checking mempool consistency"
        );

        let mut total_size: u64 = 0;
        let mut total_fee: u64 = 0;
        let mut usage: u64 = 0;

        for entry in self.store.iter() {
            let txid = entry.txid();
            total_size += entry.tx_size();
            total_fee += entry.fee();
            usage += entry.usage_size()
                + (entry.parents().len() + entry.children().len()) as u64 * LINK_USAGE;

            assert!(entry.count_with_ancestors() >= 1);
            assert!(entry.count_with_descendants() >= 1);

            // Parent links must agree with the transaction's inputs, and
            // every input must be fundable from the pool or the view.
            let mut parents_from_inputs = BTreeSet::new();
            for input in &entry.tx().inputs {
                if let Some(parent) = self.store.get(&input.previous_output.txid) {
                    assert!(
                        (input.previous_output.index as usize) < parent.tx().outputs.len(),
                        "pool tx {txid} spends nonexistent output {}",
                        input.previous_output
                    );
                    parents_from_inputs.insert(parent.txid());
                } else {
                    let coin = view.get_coin(&input.previous_output);
                    assert!(
                        coin.is_some(),
                        "pool tx {txid} input {} not in pool or view",
                        input.previous_output
                    );
                    if let Some(coin) = coin {
                        assert!(
                            coin.is_mature(spend_height),
                            "pool tx {txid} spends immature coinbase {}",
                            input.previous_output
                        );
                    }
                }
                assert_eq!(
                    self.next_tx.get(&input.previous_output),
                    Some(&txid),
                    "next-output index missing spend of {}",
                    input.previous_output
                );
            }
            assert_eq!(
                &parents_from_inputs,
                entry.parents(),
                "parent links disagree with inputs for {txid}"
            );

            // Ancestor aggregates recomputed from the links.
            let ancestors = self.ancestors_of(&txid);
            let mut size = entry.tx_size();
            let mut count = 1u64;
            let mut fees = entry.modified_fee();
            let mut sig_checks = entry.sig_checks();
            for ancestor in &ancestors {
                let e = self.store.get(ancestor).expect("dangling parent link");
                assert!(
                    e.children().contains(&txid) || !entry.parents().contains(ancestor),
                    "parent/child asymmetry between {ancestor} and {txid}"
                );
                size += e.tx_size();
                count += 1;
                fees += e.modified_fee();
                sig_checks += e.sig_checks();
            }
            assert_eq!(size, entry.size_with_ancestors(), "ancestor size for {txid}");
            assert_eq!(count, entry.count_with_ancestors(), "ancestor count for {txid}");
            assert_eq!(fees, entry.fees_with_ancestors(), "ancestor fees for {txid}");
            assert_eq!(
                sig_checks,
                entry.sig_checks_with_ancestors(),
                "ancestor sigchecks for {txid}"
            );

            // Child links must agree with the next-output index.
            let mut children_from_index = BTreeSet::new();
            for index in 0..entry.tx().outputs.len() as u64 {
                if let Some(child) = self.next_tx.get(&OutPoint::new(txid, index)) {
                    assert!(self.store.contains(child), "spender {child} not in pool");
                    children_from_index.insert(*child);
                }
            }
            assert_eq!(
                &children_from_index,
                entry.children(),
                "child links disagree with spends for {txid}"
            );

            // Descendant aggregates recomputed from the links.
            let descendants = self.descendants_of(&txid);
            let mut size = entry.tx_size();
            let mut count = 1u64;
            let mut fees = entry.modified_fee();
            let mut sig_checks = entry.sig_checks();
            for descendant in &descendants {
                let e = self.store.get(descendant).expect("dangling child link");
                size += e.tx_size();
                count += 1;
                fees += e.modified_fee();
                sig_checks += e.sig_checks();
            }
            assert_eq!(size, entry.size_with_descendants(), "descendant size for {txid}");
            assert_eq!(count, entry.count_with_descendants(), "descendant count for {txid}");
            assert_eq!(fees, entry.fees_with_descendants(), "descendant fees for {txid}");
            assert_eq!(
                sig_checks,
                entry.sig_checks_with_descendants(),
                "descendant sigchecks for {txid}"
            );
        }

        // Every next-output mapping points at a pool transaction that
        // really spends that outpoint.
        for (outpoint, spender) in &self.next_tx {
            let entry = self.store.get(spender).expect("next-output entry not in pool");
            assert!(
                entry
                    .tx()
                    .inputs
                    .iter()
                    .any(|i| &i.previous_output == outpoint),
                "next-output maps {outpoint} to non-spender {spender}"
            );
        }

        assert_eq!(total_size, self.total_tx_size, "total size drift");
        assert_eq!(total_fee, self.total_fee, "total fee drift");
        assert_eq!(usage, self.inner_usage, "inner usage drift");
    }
}

/// Relay ordering on two entries: fee/size on the unmodified fee so
/// operator prioritisation cannot be observed from relay order; ties put
/// the higher txid first.
fn cmp_relay_score(a: &MempoolEntry, b: &MempoolEntry) -> std::cmp::Ordering {
    cmp_feerate(b.fee() as i64, b.tx_size(), a.fee() as i64, a.tx_size())
        .then_with(|| b.txid().cmp(&a.txid()))
}
