// ==============================================
// COUNTER STORE CONCURRENCY TESTS (integration)
// ==============================================
//
// Properties of the generation swap under real thread contention. These need
// multi-threaded execution and cannot live inline.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use hitpoints_core::{CounterSnapshot, HitKey};
use hitpoints_server::counter::CounterStore;

// ==============================================
// No lost updates
// ==============================================

#[test]
fn concurrent_increments_on_one_key_are_all_counted() {
    const WORKERS: usize = 8;
    const PER_WORKER: u64 = 5_000;

    let store = Arc::new(CounterStore::new());
    let barrier = Arc::new(Barrier::new(WORKERS));
    let key = HitKey::from("https://ex.com/hot");

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..PER_WORKER {
                    store.increment(&key);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        store.snapshot().get(key.as_str()),
        Some(WORKERS as u64 * PER_WORKER)
    );
}

#[test]
fn concurrent_first_inserts_do_not_race() {
    // Many threads creating the same fresh keys at once.
    for round in 0..50 {
        let store = Arc::new(CounterStore::new());
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for k in 0..16 {
                        store.increment(&HitKey::new(format!("k{k}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = store.snapshot();
        assert_eq!(snap.len(), 16, "round {round}");
        assert!(snap.iter().all(|(_, v)| v == 4), "round {round}");
    }
}

// ==============================================
// Clear boundary: no loss, no duplication
// ==============================================

#[test]
fn snapshot_and_clear_under_load_loses_and_duplicates_nothing() {
    const WRITERS: usize = 6;
    const PER_WRITER: u64 = 20_000;

    let store = Arc::new(CounterStore::new());
    let done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(WRITERS + 1));
    let keys: Vec<HitKey> = ["A", "B", "C"].iter().map(|k| HitKey::from(*k)).collect();

    let writers: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let key = keys[i % keys.len()].clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..PER_WRITER {
                    store.increment(&key);
                }
            })
        })
        .collect();

    let drainer = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let mut taken: Vec<CounterSnapshot> = Vec::new();
            while !done.load(Ordering::Acquire) {
                taken.push(store.snapshot_and_clear());
                thread::yield_now();
            }
            taken
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let mut taken = drainer.join().unwrap();
    taken.push(store.snapshot_and_clear());

    let total: u64 = taken.iter().map(CounterSnapshot::total).sum();
    assert_eq!(total, WRITERS as u64 * PER_WRITER);
    assert!(store.snapshot().is_empty());
}

#[test]
fn increments_after_clear_show_up_only_in_later_snapshots() {
    let store = Arc::new(CounterStore::new());
    let a = HitKey::from("A");
    let b = HitKey::from("B");

    store.increment(&a);
    let before = store.snapshot_and_clear();
    assert_eq!(before.get("A"), Some(1));

    // Key not touched since the clear is absent.
    assert!(store.snapshot().get("A").is_none());

    store.increment(&b);
    let after = store.snapshot_and_clear();
    assert_eq!(after.get("A"), None);
    assert_eq!(after.get("B"), Some(1));
    assert_eq!(before.get("B"), None);
}

#[test]
fn subtract_under_load_keeps_every_unarchived_hit() {
    const WRITERS: usize = 4;
    const PER_WRITER: u64 = 25_000;

    let store = Arc::new(CounterStore::new());
    let archived_total = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let key = HitKey::from("A");

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let key = key.clone();
            thread::spawn(move || {
                for _ in 0..PER_WRITER {
                    store.increment(&key);
                }
            })
        })
        .collect();

    let archiver = {
        let store = Arc::clone(&store);
        let archived_total = Arc::clone(&archived_total);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let snap = store.snapshot();
                archived_total.fetch_add(snap.total(), Ordering::Relaxed);
                store.subtract(&snap);
                thread::yield_now();
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    archiver.join().unwrap();

    let remaining = store.snapshot().total();
    assert_eq!(
        archived_total.load(Ordering::Relaxed) + remaining,
        WRITERS as u64 * PER_WRITER
    );
}
