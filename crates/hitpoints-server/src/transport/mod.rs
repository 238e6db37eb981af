//! HTTP transport: the tracking pixel endpoint.

pub mod pixel;
