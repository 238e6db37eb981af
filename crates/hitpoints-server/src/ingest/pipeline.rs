//! Bounded queue + fixed worker pool between request handling and counting.
//!
//! Backpressure policy: **drop on full**. `ingest` uses `try_send` and never
//! waits; when the queue is at capacity the hit is discarded, counted in
//! `hitpoints_hits_dropped_total{reason="queue_full"}` and a warning is logged
//! once per saturation streak (the first drop after a successful enqueue).
//!
//! Workers share one receiver behind an async mutex. Each key is applied
//! inside `catch_unwind`, so a panicking sink loses that one hit and the
//! worker keeps going.
//!
//! On shutdown the receiving side is closed, so every later send fails with
//! `Closed`; workers keep pulling until the closed queue is empty, then exit.
//! A key is either applied or reported as dropped, never left in the queue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use hitpoints_core::{normalize, HitKey};

use crate::counter::CounterStore;
use crate::lifecycle::ShutdownSignal;
use crate::obs::HitMetrics;

/// Where dequeued keys end up.
pub trait HitSink: Send + Sync + 'static {
    fn record(&self, key: &HitKey);
}

impl HitSink for CounterStore {
    fn record(&self, key: &HitKey) {
        self.increment(key);
    }
}

/// Result of one `ingest` call. Callers serve the response either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    Closed,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::QueueFull => "queue_full",
            DropReason::Closed => "closed",
        }
    }
}

pub struct IngestPipeline {
    tx: mpsc::Sender<HitKey>,
    rx: Arc<Mutex<mpsc::Receiver<HitKey>>>,
    sink: Arc<dyn HitSink>,
    metrics: Arc<HitMetrics>,
    workers: usize,
    saturated: AtomicBool,
    closed: AtomicBool,
}

impl IngestPipeline {
    /// `capacity` and `workers` are clamped to at least 1.
    pub fn new(
        sink: Arc<dyn HitSink>,
        metrics: Arc<HitMetrics>,
        capacity: usize,
        workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            sink,
            metrics,
            workers: workers.max(1),
            saturated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Normalize one raw hit and enqueue it. Never blocks, never does I/O.
    pub fn ingest(&self, url_param: &str, referer: &str) -> IngestOutcome {
        self.ingest_key(normalize(url_param, referer))
    }

    /// Enqueue an already-normalized key.
    pub fn ingest_key(&self, key: HitKey) -> IngestOutcome {
        if self.closed.load(Ordering::Acquire) {
            return self.dropped(DropReason::Closed);
        }

        match self.tx.try_send(key) {
            Ok(()) => {
                self.metrics.hits_ingested.inc(&[]);
                if self.saturated.swap(false, Ordering::Relaxed) {
                    tracing::info!("ingest queue accepting hits again");
                }
                IngestOutcome::Queued
            }
            Err(TrySendError::Full(key)) => {
                if !self.saturated.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        %key,
                        capacity = self.tx.max_capacity(),
                        "ingest queue full, dropping hits"
                    );
                }
                self.dropped(DropReason::QueueFull)
            }
            Err(TrySendError::Closed(_)) => self.dropped(DropReason::Closed),
        }
    }

    fn dropped(&self, reason: DropReason) -> IngestOutcome {
        self.metrics
            .hits_dropped
            .inc(&[("reason", reason.as_str())]);
        IngestOutcome::Dropped(reason)
    }

    /// Refuse further hits. Already queued keys are still applied by workers.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(queued = self.queue_depth(), "ingest pipeline closed");
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Spawn the worker pool on the current runtime.
    pub fn spawn_workers(&self, shutdown: ShutdownSignal) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    rx: Arc::clone(&self.rx),
                    sink: Arc::clone(&self.sink),
                    metrics: Arc::clone(&self.metrics),
                };
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<HitKey>>>,
    sink: Arc<dyn HitSink>,
    metrics: Arc<HitMetrics>,
}

impl Worker {
    async fn run(self, mut shutdown: ShutdownSignal) {
        tracing::debug!(worker = self.id, "ingest worker started");
        let mut applied = 0usize;
        loop {
            let next = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    biased;
                    key = rx.recv() => key,
                    _ = shutdown.recv() => {
                        // Refuse new sends; keys already buffered are still delivered.
                        rx.close();
                        rx.recv().await
                    }
                }
            };
            match next {
                Some(key) => {
                    self.apply(&key);
                    applied += 1;
                }
                None => break,
            }
        }
        tracing::debug!(worker = self.id, applied, "ingest worker stopped");
    }

    fn apply(&self, key: &HitKey) {
        match catch_unwind(AssertUnwindSafe(|| self.sink.record(key))) {
            Ok(()) => self.metrics.hits_applied.inc(&[]),
            Err(_) => {
                self.metrics.worker_panics.inc(&[]);
                tracing::error!(worker = self.id, %key, "panic while counting hit, continuing");
            }
        }
    }
}
