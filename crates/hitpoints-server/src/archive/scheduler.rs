//! Archive cycles: snapshot → storage handoff → clear.
//!
//! One cycle at a time. `run_cycle` guards itself with a `try_lock`; a call
//! that finds a cycle in flight returns [`CycleOutcome::Skipped`] instead of
//! queueing. The timer loop computes the next fire time only after a cycle has
//! finished, so firings that fall inside a slow archive are skipped as well,
//! and never schedules the slot it just fired for a second time.
//!
//! What gets cleared depends on [`FailurePolicy`]:
//! - `Retain`: non-destructive snapshot first; on success exactly the archived
//!   counts are subtracted (hits that arrived meanwhile stay); on failure
//!   nothing is cleared and the next cycle retries.
//! - `Discard`: snapshot-and-clear up front; on failure that period is lost.
//!
//! The storage call runs after the snapshot is detached from the store, under
//! `timeout`; a timeout or a panicking adapter is an ordinary failure.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use hitpoints_core::error::{ErrorCode, HitError, Result};
use hitpoints_core::ArchiveRecord;

use super::schedule;
use crate::checkpoint::CheckpointManager;
use crate::config::{ArchiveConfig, ArchiveSchedule, FailurePolicy};
use crate::counter::CounterStore;
use crate::lifecycle::ShutdownSignal;
use crate::obs::HitMetrics;
use crate::storage::StorageAdapter;

/// Result of one `run_cycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was in flight.
    Skipped,
    /// Nothing to archive; storage was not contacted.
    Empty,
    Archived { keys: usize, hits: u64 },
    Failed { code: ErrorCode },
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Skipped => "skipped",
            CycleOutcome::Empty => "empty",
            CycleOutcome::Archived { .. } => "archived",
            CycleOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct ArchiveScheduler {
    store: Arc<CounterStore>,
    storage: Arc<dyn StorageAdapter>,
    checkpoint: Option<Arc<CheckpointManager>>,
    metrics: Arc<HitMetrics>,
    schedule: ArchiveSchedule,
    timeout: Duration,
    policy: FailurePolicy,
    in_flight: Mutex<()>,
}

impl ArchiveScheduler {
    pub fn new(
        store: Arc<CounterStore>,
        storage: Arc<dyn StorageAdapter>,
        metrics: Arc<HitMetrics>,
        cfg: &ArchiveConfig,
    ) -> Self {
        Self {
            store,
            storage,
            checkpoint: None,
            metrics,
            schedule: cfg.schedule,
            timeout: cfg.timeout(),
            policy: cfg.on_failure,
            in_flight: Mutex::new(()),
        }
    }

    /// Refresh this checkpoint right after every successful archive.
    pub fn with_checkpoint(mut self, checkpoint: Arc<CheckpointManager>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Run one archive cycle now.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("archive cycle already in flight, skipping");
            return self.finish(CycleOutcome::Skipped, None);
        };
        let started = Instant::now();

        let snapshot = match self.policy {
            FailurePolicy::Retain => self.store.snapshot(),
            FailurePolicy::Discard => self.store.snapshot_and_clear(),
        };
        if snapshot.is_empty() {
            tracing::debug!("nothing to archive");
            return self.finish(CycleOutcome::Empty, None);
        }

        let keys = snapshot.len();
        let hits = snapshot.total();
        let record = ArchiveRecord::new(snapshot);

        match self.hand_off(&record).await {
            Ok(()) => {
                if self.policy == FailurePolicy::Retain {
                    self.store.subtract(&record.hits);
                }
                tracing::info!(
                    backend = self.storage.name(),
                    keys,
                    hits,
                    timestamp = %record.timestamp,
                    "archived hits"
                );
                if let Some(checkpoint) = &self.checkpoint {
                    checkpoint.checkpoint_logged().await;
                }
                self.finish(CycleOutcome::Archived { keys, hits }, Some(started))
            }
            Err(e) => {
                match self.policy {
                    FailurePolicy::Retain => tracing::warn!(
                        backend = self.storage.name(),
                        keys,
                        hits,
                        error = %e,
                        "archive failed, counts kept for next cycle"
                    ),
                    FailurePolicy::Discard => tracing::error!(
                        backend = self.storage.name(),
                        keys,
                        lost_hits = hits,
                        error = %e,
                        "archive failed, counts for this period are lost"
                    ),
                }
                self.finish(CycleOutcome::Failed { code: e.code() }, Some(started))
            }
        }
    }

    async fn hand_off(&self, record: &ArchiveRecord) -> Result<()> {
        let call = AssertUnwindSafe(self.storage.archive(record)).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => Err(HitError::Storage(format!(
                "{} adapter panicked",
                self.storage.name()
            ))),
            Err(_elapsed) => Err(HitError::Timeout(self.timeout)),
        }
    }

    fn finish(&self, outcome: CycleOutcome, started: Option<Instant>) -> CycleOutcome {
        let labels = [("outcome", outcome.as_str())];
        self.metrics.archive_cycles.inc(&labels);
        if let Some(started) = started {
            self.metrics
                .archive_duration
                .observe(&labels, started.elapsed());
        }
        outcome
    }

    /// Fire cycles on the configured schedule until shutdown.
    pub fn spawn(self: Arc<Self>, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        tracing::info!(schedule = ?self.schedule, policy = ?self.policy, "archive scheduler started");
        let mut previous = None;
        loop {
            let now = Utc::now();
            let fire = self.schedule.next_fire(now, previous);
            tracing::debug!(next = %fire, "next archive cycle scheduled");

            tokio::select! {
                _ = tokio::time::sleep(schedule::until(fire, now)) => {
                    previous = Some(fire);
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("archive scheduler stopped");
    }
}
