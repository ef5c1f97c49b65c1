//! ShowTrack reference backend.
//!
//! The `showtrack-server` binary wraps [`server::router`]; tests use the
//! same router on an ephemeral port.

pub mod server;
