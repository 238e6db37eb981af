//! Ingestion pipeline exports.
//!
//! Request handlers hand normalized keys to [`IngestPipeline`]; a fixed pool
//! of workers applies them to a [`HitSink`] (the counter store in production).

pub mod pipeline;

pub use pipeline::{DropReason, HitSink, IngestOutcome, IngestPipeline};
