//! Shared application state: owns the engine and its background tasks.
//!
//! Construction order matters: the checkpoint is restored into the store
//! before the pipeline exists, so no hit can race the restore. Nothing here is
//! process-global; tests build as many independent states as they like.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use hitpoints_core::error::Result;

use crate::archive::ArchiveScheduler;
use crate::checkpoint::CheckpointManager;
use crate::config::HitpointsConfig;
use crate::counter::CounterStore;
use crate::ingest::{HitSink, IngestOutcome, IngestPipeline};
use crate::lifecycle::Shutdown;
use crate::obs::HitMetrics;
use crate::storage::{build_storage, StorageAdapter};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: HitpointsConfig,
    store: Arc<CounterStore>,
    pipeline: Arc<IngestPipeline>,
    checkpoint: Arc<CheckpointManager>,
    archive: Arc<ArchiveScheduler>,
    metrics: Arc<HitMetrics>,
    shutdown: Shutdown,
    workers: Mutex<Vec<JoinHandle<()>>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Build state with the storage backend named in `cfg`.
    pub fn new(cfg: HitpointsConfig) -> Result<Self> {
        let storage = build_storage(&cfg.storage)?;
        Self::with_storage(cfg, storage)
    }

    /// Build state around an explicit storage backend.
    pub fn with_storage(cfg: HitpointsConfig, storage: Arc<dyn StorageAdapter>) -> Result<Self> {
        cfg.validate()?;

        let metrics = Arc::new(HitMetrics::new());

        // 1) Restore counts before anything can ingest
        let restored = CheckpointManager::restore(&cfg.checkpoint.path);
        let store = Arc::new(CounterStore::with_snapshot(restored));

        // 2) Engine components
        let pipeline = Arc::new(IngestPipeline::new(
            Arc::clone(&store) as Arc<dyn HitSink>,
            Arc::clone(&metrics),
            cfg.ingest.queue_capacity,
            cfg.ingest.workers,
        ));
        let checkpoint = Arc::new(CheckpointManager::new(
            Arc::clone(&store),
            cfg.checkpoint.path.clone(),
            cfg.checkpoint.interval(),
            Arc::clone(&metrics),
        ));
        let archive = Arc::new(
            ArchiveScheduler::new(Arc::clone(&store), storage, Arc::clone(&metrics), &cfg.archive)
                .with_checkpoint(Arc::clone(&checkpoint)),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                store,
                pipeline,
                checkpoint,
                archive,
                metrics,
                shutdown: Shutdown::new(),
                workers: Mutex::new(Vec::new()),
                timers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Spawn ingestion workers and both timers. Must run inside a tokio
    /// runtime; calling it twice is a no-op.
    pub fn start(&self) {
        let mut workers = lock(&self.inner.workers);
        if !workers.is_empty() || self.inner.shutdown.is_triggered() {
            return;
        }
        let signal = self.inner.shutdown.subscribe();
        workers.extend(self.inner.pipeline.spawn_workers(signal.clone()));

        let mut timers = lock(&self.inner.timers);
        timers.push(Arc::clone(&self.inner.checkpoint).spawn(signal.clone()));
        timers.push(Arc::clone(&self.inner.archive).spawn(signal));

        tracing::info!(
            workers = self.inner.pipeline.worker_count(),
            queue_capacity = self.inner.pipeline.capacity(),
            "hitpoints engine started"
        );
    }

    /// Stop ingestion, drain the queue, stop the timers and write a final
    /// checkpoint.
    pub async fn shutdown(&self) {
        self.inner.pipeline.close();
        self.inner.shutdown.trigger();

        let workers = std::mem::take(&mut *lock(&self.inner.workers));
        let timers = std::mem::take(&mut *lock(&self.inner.timers));

        for res in join_all(workers).await {
            if let Err(e) = res {
                tracing::error!(error = %e, "ingest worker ended abnormally");
            }
        }
        for res in join_all(timers).await {
            if let Err(e) = res {
                tracing::error!(error = %e, "timer task ended abnormally");
            }
        }

        self.inner.checkpoint.checkpoint_logged().await;
        tracing::info!(live_keys = self.inner.store.len(), "hitpoints engine stopped");
    }

    pub fn cfg(&self) -> &HitpointsConfig {
        &self.inner.cfg
    }

    /// Entry point for one tracking request.
    pub fn ingest(&self, url_param: &str, referer: &str) -> IngestOutcome {
        self.inner.pipeline.ingest(url_param, referer)
    }

    pub fn store(&self) -> Arc<CounterStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn pipeline(&self) -> Arc<IngestPipeline> {
        Arc::clone(&self.inner.pipeline)
    }

    pub fn checkpoint(&self) -> Arc<CheckpointManager> {
        Arc::clone(&self.inner.checkpoint)
    }

    pub fn archive(&self) -> Arc<ArchiveScheduler> {
        Arc::clone(&self.inner.archive)
    }

    pub fn metrics(&self) -> Arc<HitMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Prometheus text with gauges refreshed.
    pub fn render_metrics(&self) -> String {
        let m = &self.inner.metrics;
        m.queue_depth
            .set(i64::try_from(self.inner.pipeline.queue_depth()).unwrap_or(i64::MAX));
        m.live_keys
            .set(i64::try_from(self.inner.store.len()).unwrap_or(i64::MAX));
        m.render()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
