//! Concurrent hit counter with generation swap.
//!
//! Counts live in a `DashMap<HitKey, AtomicU64>` (one generation) held behind
//! a single `RwLock`:
//! - `increment` takes the outer lock *shared*, so any number of workers count
//!   in parallel and only contend on the DashMap shard of their key. Existing
//!   keys are bumped with a `fetch_add` under the shard read lock.
//! - `snapshot_and_clear`, `snapshot`, `subtract` and `load_from` take the
//!   outer lock *exclusively*. While it is held no increment is in flight, so
//!   every increment lands entirely before (in the old generation) or entirely
//!   after (in the new one) the operation.
//!
//! The swap itself is `mem::take` of the generation; the old map is turned
//! into a `CounterSnapshot` after the lock is released.
//!
//! Lock poisoning is recovered from (`PoisonError::into_inner`): the map is
//! never left half-updated by a panicking increment, so the data is still
//! valid.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;

use hitpoints_core::{CounterSnapshot, HitKey};

type Generation = DashMap<HitKey, AtomicU64>;

/// Sole owner of live count state.
#[derive(Default)]
pub struct CounterStore {
    generation: RwLock<Generation>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated from a restored checkpoint.
    pub fn with_snapshot(snapshot: CounterSnapshot) -> Self {
        let store = Self::new();
        store.load_from(snapshot);
        store
    }

    /// Add one hit for `key`, creating the entry at 1 if absent.
    pub fn increment(&self, key: &HitKey) {
        self.add(key, 1);
    }

    /// Add `n` hits for `key`.
    pub fn add(&self, key: &HitKey, n: u64) {
        if n == 0 {
            return;
        }
        let generation = self.read();
        if let Some(counter) = generation.get(key.as_str()) {
            counter.fetch_add(n, Ordering::Relaxed);
            return;
        }
        generation
            .entry(key.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Capture everything and reset to empty, as one step.
    pub fn snapshot_and_clear(&self) -> CounterSnapshot {
        let old = {
            let mut generation = self.write();
            std::mem::take(&mut *generation)
        };
        old.into_iter()
            .map(|(k, v)| (k, v.into_inner()))
            .collect()
    }

    /// Point-in-time copy; counts are left untouched.
    pub fn snapshot(&self) -> CounterSnapshot {
        let generation = self.write();
        generation
            .iter()
            .map(|r| (r.key().clone(), r.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Remove exactly the counts in `archived`.
    ///
    /// Hits that arrived after `archived` was taken survive as the remaining
    /// delta; keys whose count drops to zero are removed.
    pub fn subtract(&self, archived: &CounterSnapshot) {
        let mut generation = self.write();
        let map = &mut *generation;
        for (key, archived_count) in archived.iter() {
            let exhausted = match map.get_mut(key.as_str()) {
                Some(mut counter) => {
                    let live = counter.get_mut();
                    *live = live.saturating_sub(archived_count);
                    *live == 0
                }
                None => false,
            };
            if exhausted {
                map.remove(key.as_str());
            }
        }
    }

    /// Replace all state with `snapshot`. Startup only.
    pub fn load_from(&self, snapshot: CounterSnapshot) {
        let fresh: Generation = snapshot
            .into_iter()
            .map(|(k, v)| (k, AtomicU64::new(v)))
            .collect();
        *self.write() = fresh;
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Generation> {
        self.generation.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Generation> {
        self.generation.write().unwrap_or_else(PoisonError::into_inner)
    }
}
