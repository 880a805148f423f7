//! posproctor-exporter — pull-based exposition endpoint.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/metrics` | Prometheus text exposition |
//! | GET | `/healthz` | Liveness probe |
//!
//! Every scrape renders the full registry; nothing is cached between
//! requests.

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use posproctor_metrics::{CONTENT_TYPE, MetricsRegistry};

/// Build the exposition router.
pub fn build_router(metrics: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .with_state(metrics)
}

/// GET /metrics
pub async fn prometheus_metrics(State(metrics): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    let body = metrics.render();
    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok\n")
}

/// Serve the router on `listener` until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    metrics: Arc<MetricsRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "metrics endpoint listening");
    }
    axum::serve(listener, build_router(metrics))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
