//! graceful-lifecycle
//!
//! Runs a small HTTP application under full lifecycle control.
//!
//! # Architecture Overview
//!
//! ```text
//!     Orchestrator probes ──▶ ProbeServer (:4000) ──▶ Lifecycle::is_live / is_ready
//!
//!     Client requests ─────▶ DrainCoordinator (:8080) ──▶ application router
//!                                                          (pending tasks per job)
//!
//!     SIGTERM/SIGHUP/SIGINT ─▶ Lifecycle::shutdown
//!                                → delay → pending work → hooks (listener drain)
//!                                → terminated
//! ```

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use serde::Deserialize;

use graceful_lifecycle::config::{load_config, AppConfig};
use graceful_lifecycle::http::ProbeServer;
use graceful_lifecycle::lifecycle::{BoxError, Lifecycle, OsSignals};
use graceful_lifecycle::net::DrainCoordinator;
use graceful_lifecycle::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "graceful-lifecycle")]
#[command(
    about = "HTTP service with liveness/readiness probes and graceful drain",
    long_about = None
)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct WorkParams {
    ms: Option<u64>,
}

async fn index() -> &'static str {
    "ok\n"
}

/// Simulated job; shutdown waits for it before running termination hooks.
async fn work(State(lifecycle): State<Lifecycle>, Query(params): Query<WorkParams>) -> String {
    let ms = params.ms.unwrap_or(100);
    let task = lifecycle.create_pending_task();
    tokio::time::sleep(Duration::from_millis(ms)).await;
    task.mark_complete();
    format!("worked {ms}ms\n")
}

fn app_router(lifecycle: Lifecycle) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/work", get(work))
        .with_state(lifecycle)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability)?;

    tracing::info!("graceful-lifecycle v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        probes_enabled = config.probes.enabled,
        shutdown_delay_secs = config.lifecycle.shutdown_delay_secs,
        termination_grace_period_secs = config.lifecycle.termination_grace_period_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let lifecycle = Lifecycle::from_config(&config.lifecycle);
    lifecycle.shutdown_on_signals(&OsSignals, &config.lifecycle.signals())?;

    let _probes = if config.probes.enabled {
        Some(ProbeServer::start(lifecycle.clone(), &config.probes).await?)
    } else {
        None
    };

    let listener_config = config.listener.clone();
    let router = app_router(lifecycle.clone());
    let app_lifecycle = lifecycle.clone();
    lifecycle.register_startup_task(move || async move {
        match DrainCoordinator::bind(&listener_config, router).await {
            Ok(coordinator) => {
                tracing::info!(address = %coordinator.local_addr(), "Listening for connections");
                coordinator.drain_on_shutdown(&app_lifecycle, listener_config.drain_grace_period());
                app_lifecycle.mark_ready();
                Ok(())
            }
            Err(error) => {
                tracing::error!(error = %error, "Application listener failed to start");
                tokio::spawn(async move { app_lifecycle.shutdown().await });
                Err(BoxError::from(error))
            }
        }
    });

    lifecycle.terminated().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
