//! hitpoints core: transport-free primitives shared by the counting engine.
//!
//! This crate defines the hit key contract (canonicalization + sentinel), the
//! snapshot and archive record shapes handed to storage, and the error surface
//! shared by every hitpoints crate. It has no async runtime or HTTP dependency,
//! so the same types can be used by the server, by storage adapters and by
//! tooling that reads archived `hits.json` files.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed input
//! degrades to the sentinel key or surfaces as `HitError`, never as a crash.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod key;
pub mod snapshot;

/// Shared result type.
pub use error::{HitError, Result};
pub use key::{normalize, HitKey, SENTINEL_KEY};
pub use snapshot::{ArchiveRecord, CounterSnapshot, ARCHIVE_FILE_NAME};
