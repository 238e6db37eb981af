//! Periodic archival of counts to a storage backend.

pub mod schedule;
pub mod scheduler;

pub use scheduler::{ArchiveScheduler, CycleOutcome};
