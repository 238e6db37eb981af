//! Server config loader (strict parsing).

pub mod schema;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use hitpoints_core::error::{HitError, Result};

pub use schema::{
    ArchiveConfig, ArchiveSchedule, CheckpointConfig, FailurePolicy, HitpointsConfig,
    IngestConfig, ServerSection, StorageConfig,
};

pub fn load_from_file(path: impl AsRef<Path>) -> Result<HitpointsConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path).map_err(|e| HitError::io(path, e))?;
    load_from_str(&s)
}

/// Like [`load_from_file`], but a missing file means "all defaults".
pub fn load_or_default(path: impl AsRef<Path>) -> Result<HitpointsConfig> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(s) => load_from_str(&s),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            let cfg = HitpointsConfig::default();
            cfg.validate()?;
            Ok(cfg)
        }
        Err(e) => Err(HitError::io(path, e)),
    }
}

pub fn load_from_str(s: &str) -> Result<HitpointsConfig> {
    let cfg: HitpointsConfig =
        serde_yaml::from_str(s).map_err(|e| HitError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
