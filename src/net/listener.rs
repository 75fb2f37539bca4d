//! TCP listener binding and transport selection.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Select plain or TLS transport
//! - Classify accept errors (per-connection vs. listener-wide)

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum_server::tls_rustls::RustlsAcceptor;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ListenerConfig;
use crate::net::tls::load_acceptor;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[source] io::Error),

    /// Failed to load the TLS certificate or key.
    #[error("Failed to load TLS config: {0}")]
    Tls(#[source] io::Error),
}

/// How accepted streams are turned into HTTP transports.
///
/// Each TCP stream is tracked once, at accept time, whichever transport
/// applies; the TLS handshake happens inside the tracked connection.
#[derive(Clone)]
pub enum Transport {
    Plain,
    Tls(RustlsAcceptor),
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain => f.write_str("Plain"),
            Transport::Tls(_) => f.write_str("Tls"),
        }
    }
}

/// Bind the configured address and load TLS material if configured.
pub async fn bind(config: &ListenerConfig) -> Result<(TcpListener, Transport), ListenerError> {
    let addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|e| ListenerError::Bind(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    let transport = match &config.tls {
        Some(tls) => Transport::Tls(load_acceptor(tls).await.map_err(ListenerError::Tls)?),
        None => Transport::Plain,
    };

    let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

    tracing::info!(
        address = %local_addr,
        tls = transport.is_tls(),
        "Listener bound"
    );

    Ok((listener, transport))
}

/// Errors that only affect the connection being accepted.
pub(crate) fn is_connection_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Back-off after a listener-wide accept error (e.g. too many open files).
pub(crate) const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);
