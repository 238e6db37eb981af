//! hitpoints server library entry.
//!
//! This crate wires the counting engine (counter store, ingestion pipeline,
//! checkpoint manager, archive scheduler) to its storage backends and the
//! pixel HTTP surface. It is consumed by the binary (`main.rs`) and by
//! integration tests.
//!
//! As in `hitpoints-core`, panics, `unwrap` and `expect` are compile-denied:
//! background tasks log and carry on instead of taking the process down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod counter;
pub mod ingest;
pub mod lifecycle;
pub mod obs;
pub mod ops;
pub mod router;
pub mod storage;
pub mod transport;
