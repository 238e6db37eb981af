//! Archive cycle behavior against scripted storage backends.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use hitpoints_core::error::{ErrorCode, HitError, Result};
use hitpoints_core::{ArchiveRecord, HitKey};
use hitpoints_server::archive::{ArchiveScheduler, CycleOutcome};
use hitpoints_server::config::{ArchiveConfig, ArchiveSchedule, FailurePolicy};
use hitpoints_server::counter::CounterStore;
use hitpoints_server::lifecycle::Shutdown;
use hitpoints_server::obs::HitMetrics;
use hitpoints_server::storage::{MemoryStorage, StorageAdapter};

/// Fails the first `failures` calls, then delegates to memory.
#[derive(Default)]
struct Scripted {
    failures: AtomicUsize,
    calls: AtomicUsize,
    inner: MemoryStorage,
}

impl Scripted {
    fn failing(n: usize) -> Self {
        Self {
            failures: AtomicUsize::new(n),
            ..Self::default()
        }
    }
}

#[async_trait]
impl StorageAdapter for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn archive(&self, record: &ArchiveRecord) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(HitError::Storage("bucket unreachable".into()));
        }
        self.inner.archive(record).await
    }
}

fn cfg(policy: FailurePolicy) -> ArchiveConfig {
    ArchiveConfig {
        schedule: ArchiveSchedule::Interval { every_ms: 1_000 },
        timeout_ms: 100,
        on_failure: policy,
    }
}

fn scheduler(
    store: &Arc<CounterStore>,
    storage: Arc<dyn StorageAdapter>,
    policy: FailurePolicy,
) -> (Arc<ArchiveScheduler>, Arc<HitMetrics>) {
    let metrics = Arc::new(HitMetrics::new());
    let s = ArchiveScheduler::new(Arc::clone(store), storage, Arc::clone(&metrics), &cfg(policy));
    (Arc::new(s), metrics)
}

fn seed(store: &CounterStore) {
    store.add(&HitKey::from("A"), 3);
    store.add(&HitKey::from("B"), 1);
}

#[tokio::test]
async fn successful_cycle_hands_off_exact_counts_and_clears() {
    for policy in [FailurePolicy::Retain, FailurePolicy::Discard] {
        let store = Arc::new(CounterStore::new());
        seed(&store);
        let storage = Arc::new(Scripted::default());
        let (sched, metrics) = scheduler(&store, storage.clone(), policy);

        let outcome = sched.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Archived { keys: 2, hits: 4 }, "{policy:?}");

        let records = storage.inner.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hits.get("A"), Some(3));
        assert_eq!(records[0].hits.get("B"), Some(1));
        assert_eq!(records[0].hits.len(), 2);
        assert!(store.snapshot().is_empty(), "{policy:?}");
        assert_eq!(metrics.archive_cycles.get(&[("outcome", "archived")]), 1);
    }
}

#[tokio::test]
async fn empty_store_never_contacts_storage() {
    let store = Arc::new(CounterStore::new());
    let storage = Arc::new(Scripted::default());
    let (sched, metrics) = scheduler(&store, storage.clone(), FailurePolicy::Retain);

    assert_eq!(sched.run_cycle().await, CycleOutcome::Empty);
    assert_eq!(storage.calls.load(Ordering::SeqCst), 0);
    assert_eq!(metrics.archive_cycles.get(&[("outcome", "empty")]), 1);
}

#[tokio::test]
async fn discard_policy_loses_counts_on_failure() {
    let store = Arc::new(CounterStore::new());
    seed(&store);
    let storage = Arc::new(Scripted::failing(1));
    let (sched, metrics) = scheduler(&store, storage.clone(), FailurePolicy::Discard);

    let outcome = sched.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Failed { code: ErrorCode::Storage });
    assert!(store.snapshot().is_empty(), "cleared before the handoff");
    assert_eq!(metrics.archive_cycles.get(&[("outcome", "failed")]), 1);

    // The process keeps counting; the next cycle archives only new hits.
    store.increment(&HitKey::from("C"));
    assert_eq!(sched.run_cycle().await, CycleOutcome::Archived { keys: 1, hits: 1 });
    assert_eq!(storage.inner.records()[0].hits.get("A"), None);
}

#[tokio::test]
async fn retain_policy_retries_failed_counts_next_cycle() {
    let store = Arc::new(CounterStore::new());
    seed(&store);
    let storage = Arc::new(Scripted::failing(1));
    let (sched, _) = scheduler(&store, storage.clone(), FailurePolicy::Retain);

    assert_eq!(
        sched.run_cycle().await,
        CycleOutcome::Failed { code: ErrorCode::Storage }
    );
    assert_eq!(store.snapshot().total(), 4, "nothing cleared on failure");

    store.increment(&HitKey::from("A"));
    assert_eq!(sched.run_cycle().await, CycleOutcome::Archived { keys: 2, hits: 5 });

    let records = storage.inner.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hits.get("A"), Some(4));
    assert!(store.snapshot().is_empty());
}

/// Blocks inside `archive` until released.
struct Gated {
    entered: Notify,
    release: Notify,
    inner: MemoryStorage,
}

#[async_trait]
impl StorageAdapter for Gated {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn archive(&self, record: &ArchiveRecord) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.archive(record).await
    }
}

#[tokio::test]
async fn overlapping_cycle_is_skipped_and_late_hits_survive() {
    let store = Arc::new(CounterStore::new());
    seed(&store);
    let storage = Arc::new(Gated {
        entered: Notify::new(),
        release: Notify::new(),
        inner: MemoryStorage::new(),
    });
    let metrics = Arc::new(HitMetrics::new());
    let sched = Arc::new(ArchiveScheduler::new(
        Arc::clone(&store),
        storage.clone(),
        Arc::clone(&metrics),
        &ArchiveConfig {
            timeout_ms: 60_000,
            ..cfg(FailurePolicy::Retain)
        },
    ));

    let first = tokio::spawn({
        let sched = Arc::clone(&sched);
        async move { sched.run_cycle().await }
    });
    storage.entered.notified().await;

    assert_eq!(sched.run_cycle().await, CycleOutcome::Skipped);
    // Arrives while the first cycle is archiving.
    store.add(&HitKey::from("A"), 2);

    storage.release.notify_one();
    assert_eq!(first.await.unwrap(), CycleOutcome::Archived { keys: 2, hits: 4 });

    let left = store.snapshot();
    assert_eq!(left.get("A"), Some(2));
    assert_eq!(left.len(), 1);
    assert_eq!(metrics.archive_cycles.get(&[("outcome", "skipped")]), 1);
}

struct Slow;

#[async_trait]
impl StorageAdapter for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn archive(&self, _record: &ArchiveRecord) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn storage_timeout_is_an_ordinary_failure() {
    let store = Arc::new(CounterStore::new());
    seed(&store);
    let (sched, _) = scheduler(&store, Arc::new(Slow), FailurePolicy::Retain);

    assert_eq!(
        sched.run_cycle().await,
        CycleOutcome::Failed { code: ErrorCode::Timeout }
    );
    assert_eq!(store.snapshot().total(), 4);
}

struct Panicky;

#[async_trait]
impl StorageAdapter for Panicky {
    fn name(&self) -> &'static str {
        "panicky"
    }

    async fn archive(&self, _record: &ArchiveRecord) -> Result<()> {
        panic!("adapter bug");
    }
}

#[tokio::test]
async fn panicking_adapter_is_contained() {
    let store = Arc::new(CounterStore::new());
    seed(&store);
    let (sched, _) = scheduler(&store, Arc::new(Panicky), FailurePolicy::Retain);

    assert_eq!(
        sched.run_cycle().await,
        CycleOutcome::Failed { code: ErrorCode::Storage }
    );
    // Scheduler is usable again.
    assert!(matches!(sched.run_cycle().await, CycleOutcome::Failed { .. }));
    assert_eq!(store.snapshot().total(), 4);
}

#[tokio::test(start_paused = true)]
async fn timer_loop_fires_on_interval_and_stops_on_shutdown() {
    let store = Arc::new(CounterStore::new());
    seed(&store);
    let storage = Arc::new(Scripted::default());
    let (sched, _) = scheduler(&store, storage.clone(), FailurePolicy::Retain);

    let shutdown = Shutdown::new();
    let handle = Arc::clone(&sched).spawn(shutdown.subscribe());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(storage.inner.records().len(), 1);

    // Second period: nothing new, so no second record.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(storage.inner.records().len(), 1);
    assert_eq!(storage.calls.load(Ordering::SeqCst), 1);

    shutdown.trigger();
    handle.await.unwrap();
}
