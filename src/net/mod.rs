//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → drain.rs (accept loop; reject while draining)
//!     → connection.rs (tracked once, before any handshake)
//!     → listener.rs / tls.rs (optional TLS handshake)
//!     → exchange.rs (HTTP/1.1 exchanges over the application router)
//!
//! Exchange States:
//!     Idle → AwaitingResponse → Responding → Idle
//! ```
//!
//! # Design Decisions
//! - Each connection is tracked from accept until its socket is dropped
//! - TLS is optional and handled transparently
//! - Only HTTP/1.1 is served, so "close after this response" is exact

pub mod connection;
pub mod drain;
pub mod exchange;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, ExchangeState};
pub use drain::{DrainCoordinator, DrainError, DrainSummary};
pub use listener::{ListenerError, Transport};
