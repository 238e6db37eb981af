//! In-process backend. Holds every archived record; nothing survives a
//! restart.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use hitpoints_core::error::Result;
use hitpoints_core::ArchiveRecord;

use super::StorageAdapter;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<Vec<ArchiveRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of everything archived so far, oldest first.
    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn archive(&self, record: &ArchiveRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
