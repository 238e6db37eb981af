//! Local filesystem backend: `<root>/YYYY/MM/DD/HH/MM/SS/hits.json`.

use std::path::PathBuf;

use async_trait::async_trait;

use hitpoints_core::error::{HitError, Result};
use hitpoints_core::ArchiveRecord;

use super::StorageAdapter;

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// The root may not exist yet; it is created on first archive.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.is_file() {
            return Err(HitError::Config(format!(
                "storage path {} is a file, expected a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Final location of `record`.
    pub fn path_for(&self, record: &ArchiveRecord) -> PathBuf {
        self.root.join(record.object_key())
    }
}

#[async_trait]
impl StorageAdapter for FileStorage {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn archive(&self, record: &ArchiveRecord) -> Result<()> {
        let body = record.to_json_vec()?;
        let path = self.path_for(record);
        let dir = path
            .parent()
            .ok_or_else(|| HitError::Internal(format!("no parent for {}", path.display())))?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| HitError::io(dir, e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| HitError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| HitError::io(&path, e))?;

        tracing::debug!(path = %path.display(), bytes = body.len(), "archive written");
        Ok(())
    }
}
