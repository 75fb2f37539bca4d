//! Liveness and readiness probe handlers.
//!
//! Pure renderings of [`Lifecycle`] state as HTTP status codes; no I/O.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;

use crate::config::ProbeConfig;
use crate::lifecycle::Lifecycle;

/// 200 `live` if the process is live, 500 `not live` otherwise.
pub async fn liveness(State(lifecycle): State<Lifecycle>) -> (StatusCode, &'static str) {
    if lifecycle.is_live() {
        (StatusCode::OK, "live")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "not live")
    }
}

/// 200 `ready` if the process is ready, 500 `not ready` otherwise.
pub async fn readiness(State(lifecycle): State<Lifecycle>) -> (StatusCode, &'static str) {
    if lifecycle.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "not ready")
    }
}

pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// Router serving both probes on the configured paths. Any method matches.
pub fn probe_router(lifecycle: Lifecycle, config: &ProbeConfig) -> Router {
    Router::new()
        .route(&config.liveness_path, any(liveness))
        .route(&config.readiness_path, any(readiness))
        .fallback(not_found)
        .with_state(lifecycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get(router: &Router, path: &str) -> (StatusCode, String) {
        let response = router
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn probes_follow_lifecycle() {
        let lifecycle = Lifecycle::new();
        let router = probe_router(lifecycle.clone(), &ProbeConfig::default());

        assert_eq!(get(&router, "/healthz").await, (StatusCode::OK, "live".to_string()));
        assert_eq!(
            get(&router, "/readyz").await,
            (StatusCode::INTERNAL_SERVER_ERROR, "not ready".to_string())
        );

        lifecycle.mark_ready();
        assert_eq!(get(&router, "/readyz").await, (StatusCode::OK, "ready".to_string()));
    }

    #[tokio::test]
    async fn query_string_is_ignored() {
        let router = probe_router(Lifecycle::new(), &ProbeConfig::default());
        assert_eq!(get(&router, "/healthz?verbose=1").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn custom_paths_and_fallback() {
        let config = ProbeConfig {
            liveness_path: "/live".to_string(),
            readiness_path: "/ready".to_string(),
            ..ProbeConfig::default()
        };
        let router = probe_router(Lifecycle::new(), &config);

        assert_eq!(get(&router, "/live").await.0, StatusCode::OK);
        assert_eq!(
            get(&router, "/healthz").await,
            (StatusCode::NOT_FOUND, "not found".to_string())
        );
    }
}
