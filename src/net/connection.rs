//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track the exchange state of each connection (Idle → AwaitingResponse →
//!   Responding → Idle)
//! - Let the drain coordinator close a connection now or after its response
//!
//! # Design Decisions
//! - A connection untracks itself from its guard's `Drop`, so a connection
//!   that closes on its own is never force-closed afterwards
//! - Closing is cooperative: the connection task watches two tokens and drops
//!   the socket itself

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a connection is doing right now.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// No request in flight (fresh or keep-alive connection).
    Idle = 0,
    /// A request is being handled; no response has been produced yet.
    AwaitingResponse = 1,
    /// Response headers are out; the body is being written.
    Responding = 2,
}

impl From<u8> for ExchangeState {
    fn from(val: u8) -> Self {
        match val {
            1 => ExchangeState::AwaitingResponse,
            2 => ExchangeState::Responding,
            _ => ExchangeState::Idle,
        }
    }
}

/// Shared view of one tracked connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    exchange: Arc<AtomicU8>,
    close_after_response: CancellationToken,
    destroy: CancellationToken,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn exchange_state(&self) -> ExchangeState {
        ExchangeState::from(self.exchange.load(Ordering::Acquire))
    }

    /// Ask the connection to close once the current response is sent.
    pub fn close_after_response(&self) {
        self.close_after_response.cancel();
    }

    /// Close the connection immediately, abandoning any exchange.
    pub fn destroy(&self) {
        self.destroy.cancel();
    }

    pub(crate) fn close_after_response_token(&self) -> &CancellationToken {
        &self.close_after_response
    }

    pub(crate) fn destroy_token(&self) -> &CancellationToken {
        &self.destroy
    }

    pub(crate) fn exchanges(&self) -> ExchangeTracker {
        ExchangeTracker {
            state: Arc::clone(&self.exchange),
        }
    }
}

/// Updates the exchange state as requests flow through a connection.
#[derive(Debug, Clone)]
pub(crate) struct ExchangeTracker {
    state: Arc<AtomicU8>,
}

impl ExchangeTracker {
    /// A request arrived.
    pub(crate) fn begin(&self) -> ExchangeGuard {
        self.state
            .store(ExchangeState::AwaitingResponse as u8, Ordering::Release);
        ExchangeGuard {
            state: Arc::clone(&self.state),
        }
    }
}

/// One request/response exchange. Resets the connection to idle on drop,
/// which happens once the response body has been fully written (or dropped).
#[derive(Debug)]
pub(crate) struct ExchangeGuard {
    state: Arc<AtomicU8>,
}

impl ExchangeGuard {
    /// Response headers produced; body about to be written.
    pub(crate) fn responding(&self) {
        self.state
            .store(ExchangeState::Responding as u8, Ordering::Release);
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.state.store(ExchangeState::Idle as u8, Ordering::Release);
    }
}

/// Tracks live connections of one listener.
///
/// Uses a watch channel to signal when the set of connections changes.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    listener: Arc<str>,
    connections: Arc<DashMap<ConnectionId, ConnectionHandle>>,
    count: Arc<watch::Sender<usize>>,
}

impl ConnectionRegistry {
    /// Create a registry; `listener` labels logs and metrics.
    pub fn new(listener: impl Into<Arc<str>>) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            listener: listener.into(),
            connections: Arc::new(DashMap::new()),
            count: Arc::new(count),
        }
    }

    /// Record a new connection. Returns a guard that untracks it on drop.
    pub fn track(&self, peer: SocketAddr) -> ConnectionGuard {
        let handle = ConnectionHandle {
            id: ConnectionId::new(),
            peer,
            exchange: Arc::new(AtomicU8::new(ExchangeState::Idle as u8)),
            close_after_response: CancellationToken::new(),
            destroy: CancellationToken::new(),
        };
        self.connections.insert(handle.id, handle.clone());
        self.publish_count();
        tracing::trace!(connection_id = %handle.id, peer_addr = %peer, "Connection tracked");
        ConnectionGuard {
            registry: self.clone(),
            handle,
        }
    }

    /// Label of the listener this registry belongs to.
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// Number of connections currently tracked.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Handles of every tracked connection at this instant.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Resolves once no connection is tracked.
    pub async fn wait_empty(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Re-reads the map length under the watch lock, so the last publisher
    /// always observes every mutation before it.
    fn publish_count(&self) {
        let mut count = 0;
        self.count.send_modify(|published| {
            *published = self.connections.len();
            count = *published;
        });
        metrics::set_tracked_connections(&self.listener, count);
    }

    fn untrack(&self, handle: &ConnectionHandle) {
        if self.connections.remove(&handle.id).is_some() {
            self.publish_count();
            let reason = if handle.destroy.is_cancelled() {
                "destroyed"
            } else {
                "closed"
            };
            metrics::record_connection_closed(&self.listener, reason);
            tracing::trace!(connection_id = %handle.id, reason, "Connection untracked");
        }
    }
}

/// Guard that tracks a connection's lifetime.
/// Removes the connection from its registry when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: ConnectionRegistry,
    handle: ConnectionHandle,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.untrack(&self.handle);
    }
}
