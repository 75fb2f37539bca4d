//! HTTP probe layer.
//!
//! # Data Flow
//! ```text
//! Orchestrator probe request
//!     → server.rs (probe listener, tracing)
//!     → probes.rs (render Lifecycle::is_live / is_ready)
//!     → 200 / 500 / 404
//! ```

pub mod probes;
pub mod server;

pub use server::{ProbeError, ProbeServer};
