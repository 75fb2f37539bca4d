//! HTTP/1.1 serving for one tracked connection.
//!
//! # Responsibilities
//! - Run an axum `Router` over a single connection with hyper
//! - Record exchange state (awaiting response / responding / idle)
//! - Advertise `Connection: close` on every response once draining
//! - React to close-after-response and destroy requests
//!
//! # Design Decisions
//! - The response body carries the exchange guard, so the connection only
//!   returns to idle once hyper has finished writing (or dropped) the body
//! - Close-after-response maps onto hyper's graceful shutdown, which lets the
//!   in-flight exchange finish and then closes

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response};
use axum::Router;
use futures_util::future::BoxFuture;
use hyper::body::{Body as HttpBody, Bytes, Frame, Incoming, SizeHint};
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::net::connection::{ConnectionHandle, ExchangeGuard, ExchangeTracker};

/// Response body that keeps its exchange marked active until it is consumed.
pub struct ExchangeBody {
    inner: Body,
    _exchange: ExchangeGuard,
}

impl HttpBody for ExchangeBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Hyper service wrapping the application router.
#[derive(Clone)]
struct ExchangeService {
    router: Router,
    exchanges: ExchangeTracker,
    draining: CancellationToken,
}

impl hyper::service::Service<Request<Incoming>> for ExchangeService {
    type Response = Response<ExchangeBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let exchange = self.exchanges.begin();
        let router = self.router.clone();
        let draining = self.draining.clone();
        Box::pin(async move {
            let mut response = router
                .oneshot(request)
                .await
                .unwrap_or_else(|never| match never {});
            if draining.is_cancelled() {
                response
                    .headers_mut()
                    .insert(header::CONNECTION, HeaderValue::from_static("close"));
            }
            exchange.responding();
            Ok(response.map(|inner| ExchangeBody {
                inner,
                _exchange: exchange,
            }))
        })
    }
}

/// Serve `io` until the peer closes, the connection is destroyed, or a
/// requested close-after-response completes.
pub(crate) async fn serve_connection<I>(
    io: I,
    router: Router,
    connection: &ConnectionHandle,
    draining: CancellationToken,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = ExchangeService {
        router,
        exchanges: connection.exchanges(),
        draining,
    };
    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let destroy = connection.destroy_token();
    let close_after_response = connection.close_after_response_token();

    let result = tokio::select! {
        biased;
        _ = destroy.cancelled() => return,
        result = conn.as_mut() => result,
        _ = close_after_response.cancelled() => {
            conn.as_mut().graceful_shutdown();
            tokio::select! {
                biased;
                _ = destroy.cancelled() => return,
                result = conn.as_mut() => result,
            }
        }
    };

    if let Err(error) = result {
        tracing::debug!(
            connection_id = %connection.id(),
            peer_addr = %connection.peer(),
            error = %error,
            "Connection ended with error"
        );
    }
}
