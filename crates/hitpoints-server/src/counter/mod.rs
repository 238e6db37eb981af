//! Counter store module exports.

pub mod store;

pub use store::CounterStore;
