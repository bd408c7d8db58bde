//! Multi-ordered entry storage.
//!
//! One owning map keyed by txid, plus three ordered sets over derived score
//! keys. Every mutation that can move an entry's position goes through
//! [`EntryIndex::modify`], which removes the old keys, applies the change,
//! and reinserts the recomputed keys, so the orderings never observe a stale
//! score.
//!
//! Score comparisons are exact: cross-products in 128-bit integers, never
//! division or floats.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use beck_core::types::Hash256;

use crate::entry::MempoolEntry;
use crate::epoch::EpochGuard;
use crate::feerate::cmp_feerate;

/// Eviction ordering: ascending by `max(own feerate, feerate with
/// descendants)`, so the first element is the least valuable package root.
///
/// Ties order later entry time first: between equal-feerate entries the
/// newer one is evicted first.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DescendantScoreKey {
    fee: i64,
    size: u64,
    time: i64,
    pub(crate) txid: Hash256,
}

impl Ord for DescendantScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_feerate(self.fee, self.size, other.fee, other.size)
            .then_with(|| other.time.cmp(&self.time))
            .then_with(|| self.txid.cmp(&other.txid))
    }
}

impl PartialOrd for DescendantScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DescendantScoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DescendantScoreKey {}

/// Mining ordering: descending by `min(own feerate, feerate with
/// ancestors)`, so the first element is the best next package member.
///
/// Ties order lower txid first.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AncestorScoreKey {
    fee: i64,
    size: u64,
    pub(crate) txid: Hash256,
}

impl Ord for AncestorScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_feerate(other.fee, other.size, self.fee, self.size)
            .then_with(|| self.txid.cmp(&other.txid))
    }
}

impl PartialOrd for AncestorScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for AncestorScoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AncestorScoreKey {}

/// Expiry ordering: ascending entry time, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct EntryTimeKey {
    time: i64,
    pub(crate) txid: Hash256,
}

fn descendant_score_key(entry: &MempoolEntry) -> DescendantScoreKey {
    let own_fee = entry.modified_fee();
    let own_size = entry.tx_virtual_size();
    let pkg_fee = entry.fees_with_descendants();
    let pkg_size = entry.virtual_size_with_descendants();

    let (fee, size) = if cmp_feerate(pkg_fee, pkg_size, own_fee, own_size) == Ordering::Greater {
        (pkg_fee, pkg_size)
    } else {
        (own_fee, own_size)
    };
    DescendantScoreKey { fee, size, time: entry.time(), txid: entry.txid() }
}

fn ancestor_score_key(entry: &MempoolEntry) -> AncestorScoreKey {
    let own_fee = entry.modified_fee();
    let own_size = entry.tx_virtual_size();
    let anc_fee = entry.fees_with_ancestors();
    let anc_size = entry.virtual_size_with_ancestors();

    let (fee, size) = if cmp_feerate(anc_fee, anc_size, own_fee, own_size) == Ordering::Less {
        (anc_fee, anc_size)
    } else {
        (own_fee, own_size)
    };
    AncestorScoreKey { fee, size, txid: entry.txid() }
}

fn entry_time_key(entry: &MempoolEntry) -> EntryTimeKey {
    EntryTimeKey { time: entry.time(), txid: entry.txid() }
}

/// The owning container: txid lookup plus three maintained orderings.
#[derive(Debug, Default)]
pub(crate) struct EntryIndex {
    entries: HashMap<Hash256, MempoolEntry>,
    by_descendant_score: BTreeSet<DescendantScoreKey>,
    by_ancestor_score: BTreeSet<AncestorScoreKey>,
    by_entry_time: BTreeSet<EntryTimeKey>,
}

impl EntryIndex {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub(crate) fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// Insert into all orderings. Returns false (and leaves the container
    /// untouched) if the txid is already present.
    pub(crate) fn insert(&mut self, entry: MempoolEntry) -> bool {
        let txid = entry.txid();
        if self.entries.contains_key(&txid) {
            return false;
        }
        self.by_descendant_score.insert(descendant_score_key(&entry));
        self.by_ancestor_score.insert(ancestor_score_key(&entry));
        self.by_entry_time.insert(entry_time_key(&entry));
        self.entries.insert(txid, entry);
        true
    }

    /// Remove from all orderings.
    pub(crate) fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        self.by_descendant_score.remove(&descendant_score_key(&entry));
        self.by_ancestor_score.remove(&ancestor_score_key(&entry));
        self.by_entry_time.remove(&entry_time_key(&entry));
        Some(entry)
    }

    /// Apply `f` to an entry, re-sorting the orderings around the change.
    ///
    /// The old keys are captured before `f` runs; mutating outside `modify`
    /// would leave the sets pointing at positions the comparators no longer
    /// agree with.
    pub(crate) fn modify(&mut self, txid: &Hash256, f: impl FnOnce(&mut MempoolEntry)) -> bool {
        if !self.entries.contains_key(txid) {
            return false;
        }
        {
            let entry = &self.entries[txid];
            self.by_descendant_score.remove(&descendant_score_key(entry));
            self.by_ancestor_score.remove(&ancestor_score_key(entry));
            self.by_entry_time.remove(&entry_time_key(entry));
        }
        if let Some(entry) = self.entries.get_mut(txid) {
            f(entry);
        }
        let entry = &self.entries[txid];
        self.by_descendant_score.insert(descendant_score_key(entry));
        self.by_ancestor_score.insert(ancestor_score_key(entry));
        self.by_entry_time.insert(entry_time_key(entry));
        true
    }

    /// Stamp an entry with the active traversal generation.
    ///
    /// Returns true if it was already visited in this generation.
    pub(crate) fn visit(&mut self, txid: &Hash256, guard: &EpochGuard) -> bool {
        match self.entries.get_mut(txid) {
            Some(entry) => guard.visit(&mut entry.epoch_marker),
            None => {
                debug_assert!(false, "visited unknown entry {txid}");
                true
            }
        }
    }

    /// Arbitrary-order iteration.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    /// Eviction order: worst descendant score first.
    pub(crate) fn iter_by_descendant_score(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.by_descendant_score.iter().map(|k| &self.entries[&k.txid])
    }

    /// Mining order: best ancestor score first.
    pub(crate) fn iter_by_ancestor_score(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.by_ancestor_score.iter().map(|k| &self.entries[&k.txid])
    }

    /// Expiry order: oldest entry first.
    pub(crate) fn iter_by_entry_time(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.by_entry_time.iter().map(|k| &self.entries[&k.txid])
    }

    pub(crate) fn txids(&self) -> Vec<Hash256> {
        self.entries.keys().copied().collect()
    }
}
