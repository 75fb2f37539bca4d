//! Graceful listener drain.
//!
//! # Responsibilities
//! - Own the accept loop of one listener
//! - Reject new connections once draining
//! - Close idle connections, let in-flight exchanges finish, force-close the
//!   rest after a grace period
//! - Close the listener
//!
//! # Drain sequence
//! ```text
//! drain(grace)
//!     → draining flag set (new connections rejected, responses say close)
//!     → idle: destroy │ awaiting response: close after send │ responding: leave
//!     → wait ≤ grace for tracked connections to close
//!     → destroy every connection still tracked
//!     → stop accept loop, drop listener
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::lifecycle::{BoxError, Lifecycle};
use crate::net::connection::{ConnectionGuard, ConnectionRegistry, ExchangeState};
use crate::net::exchange::serve_connection;
use crate::net::listener::{
    self, is_connection_error, ListenerError, Transport, ACCEPT_ERROR_BACKOFF,
};
use crate::net::tls;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum DrainError {
    /// The accept loop did not shut down cleanly.
    #[error("listener {addr} failed to close: {source}")]
    ListenerClose {
        addr: SocketAddr,
        #[source]
        source: JoinError,
    },
}

/// What a drain did to the connections it found.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// Idle connections closed immediately.
    pub closed_idle: usize,
    /// Connections asked to close after their pending response.
    pub closed_after_response: usize,
    /// Connections still open when the grace period ran out.
    pub force_closed: usize,
}

struct Inner {
    local_addr: SocketAddr,
    registry: ConnectionRegistry,
    draining: CancellationToken,
    drain_started: AtomicBool,
    stop_accepting: CancellationToken,
    accept_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Serves a router on a listener and drains it on shutdown.
#[derive(Clone)]
pub struct DrainCoordinator {
    inner: Arc<Inner>,
}

impl DrainCoordinator {
    /// Bind according to `config` and start serving `router`.
    pub async fn bind(config: &ListenerConfig, router: Router) -> Result<Self, ListenerError> {
        let (listener, transport) = listener::bind(config).await?;
        Self::serve(listener, transport, router).map_err(ListenerError::Bind)
    }

    /// Start serving `router` on an already bound listener.
    pub fn serve(
        listener: TcpListener,
        transport: Transport,
        router: Router,
    ) -> std::io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let registry = ConnectionRegistry::new(local_addr.to_string());
        let draining = CancellationToken::new();
        let stop_accepting = CancellationToken::new();

        let accept_loop = tokio::spawn(accept_loop(
            listener,
            transport,
            router,
            registry.clone(),
            draining.clone(),
            stop_accepting.clone(),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                local_addr,
                registry,
                draining,
                drain_started: AtomicBool::new(false),
                stop_accepting,
                accept_loop: Mutex::new(Some(accept_loop)),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.is_cancelled()
    }

    /// Number of connections currently tracked.
    pub fn tracked_connections(&self) -> usize {
        self.inner.registry.len()
    }

    /// Drain the listener: stop admitting, let in-flight exchanges finish
    /// within `grace`, force-close the rest, then close the listener.
    ///
    /// Only the first call drains; later calls return an empty summary.
    pub async fn drain(&self, grace: Duration) -> Result<DrainSummary, DrainError> {
        if self.inner.drain_started.swap(true, Ordering::SeqCst) {
            tracing::debug!(address = %self.inner.local_addr, "Drain already in progress");
            return Ok(DrainSummary::default());
        }

        let registry = &self.inner.registry;
        tracing::info!(
            address = %self.inner.local_addr,
            connections = registry.len(),
            grace_ms = grace.as_millis() as u64,
            "Draining listener"
        );
        self.inner.draining.cancel();

        let mut summary = DrainSummary::default();
        for connection in registry.snapshot() {
            match connection.exchange_state() {
                ExchangeState::Idle => {
                    connection.destroy();
                    summary.closed_idle += 1;
                }
                ExchangeState::AwaitingResponse => {
                    connection.close_after_response();
                    summary.closed_after_response += 1;
                }
                ExchangeState::Responding => {}
            }
        }

        if !registry.is_empty()
            && tokio::time::timeout(grace, registry.wait_empty()).await.is_err()
        {
            for connection in registry.snapshot() {
                tracing::debug!(
                    connection_id = %connection.id(),
                    peer_addr = %connection.peer(),
                    state = ?connection.exchange_state(),
                    "Grace period elapsed; destroying connection"
                );
                connection.destroy();
                summary.force_closed += 1;
            }
            registry.wait_empty().await;
        }

        self.inner.stop_accepting.cancel();
        let accept_loop = self
            .inner
            .accept_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(accept_loop) = accept_loop {
            accept_loop.await.map_err(|source| DrainError::ListenerClose {
                addr: self.inner.local_addr,
                source,
            })?;
        }

        tracing::info!(
            address = %self.inner.local_addr,
            closed_idle = summary.closed_idle,
            closed_after_response = summary.closed_after_response,
            force_closed = summary.force_closed,
            "Listener drained and closed"
        );
        Ok(summary)
    }

    /// Register this listener's drain as a termination hook of `lifecycle`.
    pub fn drain_on_shutdown(&self, lifecycle: &Lifecycle, grace: Duration) {
        let coordinator = self.clone();
        lifecycle.register_termination_hook(move || async move {
            coordinator
                .drain(grace)
                .await
                .map(|_| ())
                .map_err(BoxError::from)
        });
    }
}

async fn accept_loop(
    listener: TcpListener,
    transport: Transport,
    router: Router,
    registry: ConnectionRegistry,
    draining: CancellationToken,
    stop_accepting: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop_accepting.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(error) if is_connection_error(&error) => {
                tracing::debug!(error = %error, "Accept failed for one connection");
                continue;
            }
            Err(error) => {
                tracing::error!(error = %error, "Accept failed; backing off");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        if draining.is_cancelled() {
            tracing::debug!(peer_addr = %peer, "Rejecting connection during drain");
            metrics::record_rejected_connection(registry.listener());
            drop(stream);
            continue;
        }

        let connection = registry.track(peer);
        tokio::spawn(run_connection(
            stream,
            transport.clone(),
            router.clone(),
            connection,
            draining.clone(),
        ));
    }

    tracing::debug!(address = registry.listener(), "Accept loop stopped");
}

async fn run_connection(
    stream: TcpStream,
    transport: Transport,
    router: Router,
    connection: ConnectionGuard,
    draining: CancellationToken,
) {
    let handle = connection.handle();
    match transport {
        Transport::Plain => serve_connection(stream, router, handle, draining).await,
        Transport::Tls(acceptor) => {
            let handshake = tokio::select! {
                biased;
                _ = handle.destroy_token().cancelled() => return,
                handshake = tls::handshake(&acceptor, stream) => handshake,
            };
            match handshake {
                Ok(stream) => serve_connection(stream, router, handle, draining).await,
                Err(error) => {
                    tracing::debug!(
                        connection_id = %handle.id(),
                        peer_addr = %handle.peer(),
                        error = %error,
                        "TLS handshake failed"
                    );
                }
            }
        }
    }
    // `connection` drops here and untracks itself
}
