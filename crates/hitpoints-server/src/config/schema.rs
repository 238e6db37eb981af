use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use hitpoints_core::error::{HitError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HitpointsConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for HitpointsConfig {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSection::default(),
            ingest: IngestConfig::default(),
            checkpoint: CheckpointConfig::default(),
            archive: ArchiveConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl HitpointsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(HitError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.ingest.validate()?;
        self.checkpoint.validate()?;
        self.archive.validate()?;
        self.storage.validate()?;

        if let ArchiveSchedule::Interval { every_ms } = self.archive.schedule {
            if self.checkpoint.interval_ms >= every_ms {
                return Err(HitError::Config(
                    "checkpoint.interval_ms must be shorter than the archive interval".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1_048_576).contains(&self.queue_capacity) {
            return Err(HitError::Config(
                "ingest.queue_capacity must be between 1 and 1048576".into(),
            ));
        }
        if !(1..=256).contains(&self.workers) {
            return Err(HitError::Config(
                "ingest.workers must be between 1 and 256".into(),
            ));
        }
        Ok(())
    }
}

fn default_queue_capacity() -> usize {
    8192
}
fn default_workers() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,

    #[serde(default = "default_checkpoint_interval_ms")]
    pub interval_ms: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
            interval_ms: default_checkpoint_interval_ms(),
        }
    }
}

impl CheckpointConfig {
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(HitError::Config("checkpoint.path must not be empty".into()));
        }
        if !(1_000..=86_400_000).contains(&self.interval_ms) {
            return Err(HitError::Config(
                "checkpoint.interval_ms must be between 1000 and 86400000".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("/tmp/hitpoints")
}
fn default_checkpoint_interval_ms() -> u64 {
    60_000
}

/// When archive cycles fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum ArchiveSchedule {
    /// Every `every_ms` after start.
    Interval { every_ms: u64 },
    /// At minute `minute` of every UTC hour.
    Hourly { minute: u32 },
}

impl Default for ArchiveSchedule {
    fn default() -> Self {
        ArchiveSchedule::Hourly { minute: 30 }
    }
}

/// What an archive cycle does with counts it failed to hand off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Snapshot, archive, then subtract on success; a failure leaves the counts
    /// in the store for the next cycle.
    #[default]
    Retain,
    /// Snapshot-and-clear up front; a failure loses that period's counts.
    Discard,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub schedule: ArchiveSchedule,

    #[serde(default = "default_archive_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            schedule: ArchiveSchedule::default(),
            timeout_ms: default_archive_timeout_ms(),
            on_failure: FailurePolicy::default(),
        }
    }
}

impl ArchiveConfig {
    pub fn validate(&self) -> Result<()> {
        match self.schedule {
            ArchiveSchedule::Interval { every_ms } if !(1_000..=604_800_000).contains(&every_ms) => {
                return Err(HitError::Config(
                    "archive.schedule.interval.every_ms must be between 1000 and 604800000".into(),
                ));
            }
            ArchiveSchedule::Hourly { minute } if minute > 59 => {
                return Err(HitError::Config(
                    "archive.schedule.hourly.minute must be between 0 and 59".into(),
                ));
            }
            _ => {}
        }
        if !(100..=600_000).contains(&self.timeout_ms) {
            return Err(HitError::Config(
                "archive.timeout_ms must be between 100 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_archive_timeout_ms() -> u64 {
    30_000
}

/// Archive backend, selected at construction time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum StorageConfig {
    /// `hits.json` files under a local directory.
    File {
        #[serde(default = "default_storage_path")]
        path: PathBuf,
    },
    /// Records kept in process memory (development).
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            path: default_storage_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if let StorageConfig::File { path } = self {
            if path.as_os_str().is_empty() {
                return Err(HitError::Config("storage.path must not be empty".into()));
            }
        }
        Ok(())
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/tmp")
}
