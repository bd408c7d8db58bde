//! The pool behind the node's mutex: writers submit and reconcile while a
//! template-builder thread polls the update counter and walks the mining
//! order only when something changed.

mod common;

use common::*;

use beck_mempool::RemovalReason;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[test]
fn submitters_and_template_builder_share_the_pool() {
    let pool = Arc::new(Mutex::new(checked_pool()));
    let stop = Arc::new(AtomicBool::new(false));

    // Template builder: rebuild the greedy package view whenever the
    // update counter moves.
    let builder = {
        let pool = Arc::clone(&pool);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut last_seen = 0u32;
            let mut rebuilds = 0usize;
            while !stop.load(Ordering::Acquire) {
                let current = pool.lock().transactions_updated();
                if current != last_seen {
                    last_seen = current;
                    rebuilds += 1;
                    let guard = pool.lock();
                    let mut package_size = 0u64;
                    for entry in guard.iter_by_ancestor_score() {
                        // The walk sees a consistent snapshot under the lock.
                        assert!(entry.count_with_ancestors() >= 1);
                        package_size += entry.tx_size();
                    }
                    assert_eq!(package_size, guard.total_tx_size());
                    drop(guard);
                }
                std::thread::yield_now();
            }
            // Final poll so a late-scheduled builder still observes the
            // end state.
            if pool.lock().transactions_updated() != last_seen {
                rebuilds += 1;
            }
            rebuilds
        })
    };

    // Two writers submitting disjoint chains.
    let writers: Vec<_> = (0..2u8)
        .map(|w| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let root = make_tx(&[outpoint(w + 1, 0)], 1, w as u64);
                pool.lock().submit(entry_for(&root, 1_000, 10)).unwrap();
                let mut parent = root;
                for i in 0..20u64 {
                    let child = spend(&parent, 0, 1000 * (w as u64 + 1) + i);
                    pool.lock()
                        .submit(entry_for(&child, 1_000 + i, 20 + i as i64))
                        .unwrap();
                    parent = child;
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }

    {
        let mut guard = pool.lock();
        assert_eq!(guard.size(), 42);
        guard.check(&PermissiveView, 1);
        // Reconcile one chain out via a removal under the same lock.
        let victim = guard.iter_by_entry_time().next().unwrap().txid();
        guard.remove_recursive(&victim, RemovalReason::Expiry);
        guard.check(&PermissiveView, 1);
    }

    stop.store(true, Ordering::Release);
    let rebuilds = builder.join().unwrap();
    assert!(rebuilds > 0);
}
