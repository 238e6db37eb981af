//! Periodic, non-destructive checkpoints of the counter store.
//!
//! Blob format (JSON): `{"v":1,"written_at":"<RFC3339>","hits":{...}}`.
//! Writes go to `<path>.tmp`, are fsynced, then renamed over `<path>`, so a
//! reader never sees a half-written checkpoint. Restore treats a missing,
//! truncated, corrupt or wrong-version file the same way: warn, start empty.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use hitpoints_core::error::{HitError, Result};
use hitpoints_core::CounterSnapshot;

use crate::counter::CounterStore;
use crate::lifecycle::ShutdownSignal;
use crate::obs::HitMetrics;

const BLOB_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckpointBlob {
    v: u32,
    written_at: DateTime<Utc>,
    hits: CounterSnapshot,
}

pub struct CheckpointManager {
    store: Arc<CounterStore>,
    path: PathBuf,
    interval: Duration,
    metrics: Arc<HitMetrics>,
    // Periodic, post-archive and final checkpoints share one temp file.
    write_lock: Mutex<()>,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<CounterStore>,
        path: impl Into<PathBuf>,
        interval: Duration,
        metrics: Arc<HitMetrics>,
    ) -> Self {
        Self {
            store,
            path: path.into(),
            interval,
            metrics,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint at `path`. Never fails: anything unusable yields an
    /// empty snapshot and a warning.
    pub fn restore(path: &Path) -> CounterSnapshot {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "no checkpoint found, starting with empty counts");
                return CounterSnapshot::new();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "checkpoint unreadable, starting with empty counts");
                return CounterSnapshot::new();
            }
        };

        match serde_json::from_slice::<CheckpointBlob>(&raw) {
            Ok(blob) if blob.v == BLOB_VERSION => {
                tracing::info!(
                    path = %path.display(),
                    keys = blob.hits.len(),
                    hits = blob.hits.total(),
                    written_at = %blob.written_at,
                    "restored counts from checkpoint"
                );
                blob.hits
            }
            Ok(blob) => {
                tracing::warn!(path = %path.display(), version = blob.v, "unsupported checkpoint version, starting with empty counts");
                CounterSnapshot::new()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt checkpoint, starting with empty counts");
                CounterSnapshot::new()
            }
        }
    }

    /// Persist the current counts without clearing them. Returns the number of
    /// keys written.
    pub async fn checkpoint(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let blob = CheckpointBlob {
            v: BLOB_VERSION,
            written_at: Utc::now(),
            hits: self.store.snapshot(),
        };
        let keys = blob.hits.len();
        let body = serde_json::to_vec(&blob)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(|e| HitError::Internal(format!("checkpoint writer task failed: {e}")))??;

        tracing::debug!(path = %self.path.display(), keys, "checkpoint written");
        Ok(keys)
    }

    /// `checkpoint` with the outcome logged and counted instead of returned.
    /// A failed write is retried on the next interval.
    pub async fn checkpoint_logged(&self) -> bool {
        match self.checkpoint().await {
            Ok(_) => {
                self.metrics.checkpoints.inc(&[("result", "ok")]);
                true
            }
            Err(e) => {
                self.metrics.checkpoints.inc(&[("result", e.code().as_str())]);
                tracing::warn!(path = %self.path.display(), error = %e, "checkpoint failed, will retry next interval");
                false
            }
        }
    }

    /// Checkpoint every `interval` until shutdown. The first write happens one
    /// interval after start.
    pub fn spawn(self: Arc<Self>, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let mut tick = interval_at(Instant::now() + self.interval, self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(path = %self.path.display(), interval = ?self.interval, "checkpoint timer started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.checkpoint_logged().await;
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("checkpoint timer stopped");
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| HitError::io(dir, e))?;
    }

    let tmp = tmp_path(path);
    let mut file = File::create(&tmp).map_err(|e| HitError::io(&tmp, e))?;
    file.write_all(body).map_err(|e| HitError::io(&tmp, e))?;
    file.sync_all().map_err(|e| HitError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| HitError::io(path, e))
}
