//! Process lifecycle control and graceful listener drain.
//!
//! A [`Lifecycle`] answers the orchestrator's liveness/readiness questions and
//! runs the ordered shutdown sequence; a [`DrainCoordinator`] serves an axum
//! router and drains its listener as one of the termination hooks.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::AppConfig;
pub use http::ProbeServer;
pub use lifecycle::{Lifecycle, PendingTask, Status};
pub use net::{DrainCoordinator, DrainError, DrainSummary};
