//! Crash-recovery checkpoints of the live counts.

pub mod manager;

pub use manager::CheckpointManager;
