//! Probe server setup.
//!
//! # Responsibilities
//! - Bind the probe listener on the configured host/port
//! - Serve the liveness and readiness routes with request tracing
//! - Keep answering while the process shuts down, so the orchestrator sees
//!   readiness fail rather than a refused connection

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::ProbeConfig;
use crate::http::probes::probe_router;
use crate::lifecycle::Lifecycle;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to bind probe server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe server failed: {0}")]
    Serve(#[from] std::io::Error),

    #[error("probe server task failed: {0}")]
    Task(#[from] JoinError),
}

/// Running probe server.
pub struct ProbeServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl ProbeServer {
    /// Bind `config.host:config.port` and start serving.
    pub async fn start(lifecycle: Lifecycle, config: &ProbeConfig) -> Result<Self, ProbeError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ProbeError::Bind { addr, source })?;
        Ok(Self::serve(listener, lifecycle, config)?)
    }

    /// Serve the probes on an already bound listener.
    pub fn serve(
        listener: TcpListener,
        lifecycle: Lifecycle,
        config: &ProbeConfig,
    ) -> std::io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let router = probe_router(lifecycle, config).layer(TraceLayer::new_for_http());
        let shutdown = CancellationToken::new();

        tracing::info!(
            address = %local_addr,
            liveness_path = %config.liveness_path,
            readiness_path = %config.readiness_path,
            "Probe server starting"
        );

        let stopped = shutdown.clone().cancelled_owned();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(stopped)
                .await
        });

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting probe requests and wait for the server to exit.
    pub async fn stop(self) -> Result<(), ProbeError> {
        self.shutdown.cancel();
        self.task.await??;
        tracing::info!(address = %self.local_addr, "Probe server stopped");
        Ok(())
    }
}
