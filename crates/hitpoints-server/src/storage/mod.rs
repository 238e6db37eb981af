//! Archive storage backends.
//!
//! Every backend implements [`StorageAdapter`]; which one runs is decided by
//! `storage.kind` in the config, once, at startup.

pub mod file;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use hitpoints_core::error::Result;
use hitpoints_core::ArchiveRecord;

use crate::config::StorageConfig;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Durable handoff for one archive period.
///
/// Callers never pass an empty record. Implementations may be slow; the
/// scheduler bounds each call with its own timeout.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn archive(&self, record: &ArchiveRecord) -> Result<()>;
}

pub fn build_storage(cfg: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    let storage: Arc<dyn StorageAdapter> = match cfg {
        StorageConfig::File { path } => Arc::new(FileStorage::new(path.clone())?),
        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
    };
    tracing::info!(backend = storage.name(), "archive storage ready");
    Ok(storage)
}
