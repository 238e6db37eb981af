//! Top-level facade crate for hitpoints.
//!
//! Re-exports core types and the server library so users can depend on a single crate.

pub mod core {
    pub use hitpoints_core::*;
}

pub mod server {
    pub use hitpoints_server::*;
}
