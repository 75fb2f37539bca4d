//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     register_startup_task / register_readiness_task
//!     → task spawned immediately, id tracked in State
//!     → id removed on completion (success, failure or panic)
//!
//! Probes (state.rs):
//!     is_live / is_ready / status → pure reads of State
//!
//! Shutdown (shutdown.rs):
//!     Signal or explicit call → terminating gate (one winner)
//!     → dead-man's switch armed → delay → pending work drained
//!     → termination hooks (concurrently) → final fallback timer
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/SIGHUP → Lifecycle::shutdown
//! ```
//!
//! # Design Decisions
//! - All mutable state sits in one watch channel: mutations use
//!   `send_if_modified`, waits use `wait_for` (atomic check-then-subscribe)
//! - Nothing in the shutdown sequence propagates errors
//! - Process exit is guaranteed only by the injected [`Terminate`] action

pub mod pending;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use pending::PendingTask;
pub use shutdown::{ProcessExit, Terminate, FINAL_TERMINATION_FALLBACK};
pub use signals::{
    ChannelSignals, OsSignals, ShutdownSignal, SignalError, SignalSource, SignalStream,
};
pub use startup::TaskId;
pub use state::{Lifecycle, LifecycleBuilder, Status};

/// Error type carried by startup, readiness and termination tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a lifecycle task. Failures are logged but never change gating.
pub type TaskResult = Result<(), BoxError>;
