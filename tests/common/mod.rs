//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use graceful_lifecycle::config::ListenerConfig;
use graceful_lifecycle::lifecycle::Lifecycle;
use graceful_lifecycle::net::DrainCoordinator;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle with no delay, no grace timer and a counting terminator.
pub fn test_lifecycle() -> (Lifecycle, Arc<AtomicUsize>) {
    let terminations = Arc::new(AtomicUsize::new(0));
    let counter = terminations.clone();
    let lifecycle = Lifecycle::builder()
        .shutdown_delay(None)
        .termination_grace_period(None)
        .terminator(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    (lifecycle, terminations)
}

/// Routes whose handlers can be held open:
/// - `/` answers immediately
/// - `/hold` never answers
/// - `/release` answers once [`TestRoutes::release`] is called
/// - `/stream` sends one body chunk, then never finishes the body
#[derive(Clone, Default)]
pub struct TestRoutes {
    entered: Arc<AtomicUsize>,
    release: Arc<Notify>,
}

impl TestRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(&self) -> Router {
        let hold = self.entered.clone();
        let entered = self.entered.clone();
        let release = self.release.clone();
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/hold",
                get(move || {
                    let hold = hold.clone();
                    async move {
                        hold.fetch_add(1, Ordering::SeqCst);
                        std::future::pending::<&'static str>().await
                    }
                }),
            )
            .route(
                "/release",
                get(move || {
                    let entered = entered.clone();
                    let release = release.clone();
                    async move {
                        entered.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        "released"
                    }
                }),
            )
            .route(
                "/stream",
                get(|| async {
                    let first = stream::once(async {
                        Ok::<_, std::convert::Infallible>(Bytes::from_static(b"first-chunk"))
                    });
                    Body::from_stream(first.chain(stream::pending()))
                }),
            )
    }

    /// Let the `/release` handler answer.
    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Wait until `count` held handlers are running.
    pub async fn wait_entered(&self, count: usize) {
        let entered = self.entered.clone();
        wait_until(move || entered.load(Ordering::SeqCst) >= count).await;
    }
}

/// Serve `router` on an ephemeral localhost port.
pub async fn start_server(router: Router) -> DrainCoordinator {
    let config = ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        ..ListenerConfig::default()
    };
    DrainCoordinator::bind(&config, router).await.unwrap()
}

/// Open a connection and send one keep-alive GET request.
pub async fn send_request(addr: SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

/// Read until the peer closes. Resets count as a close.
pub async fn read_to_close(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let read = tokio::time::timeout(IO_TIMEOUT, async {
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    })
    .await;
    assert!(read.is_ok(), "peer did not close the connection");
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read until `needle` has been received, leaving the connection open.
pub async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    let mut buf = Vec::new();
    let read = tokio::time::timeout(IO_TIMEOUT, async {
        let mut chunk = [0u8; 1024];
        while !String::from_utf8_lossy(&buf).contains(needle) {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before {needle:?} arrived");
            buf.extend_from_slice(&chunk[..n]);
        }
    })
    .await;
    assert!(read.is_ok(), "timed out waiting for {needle:?}");
    String::from_utf8_lossy(&buf).into_owned()
}

/// Poll `condition` every few milliseconds until it holds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    let waited = tokio::time::timeout(IO_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition never became true");
}

/// Run `future` with the standard I/O timeout.
pub async fn with_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(IO_TIMEOUT, future)
        .await
        .expect("operation timed out")
}
