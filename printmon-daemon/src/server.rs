//! HTTP scrape endpoint

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use printmon_metrics::MetricsStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    store: Arc<MetricsStore>,
    /// Last export that encoded cleanly, served if a later one fails
    last_good: Arc<RwLock<Vec<u8>>>,
}

/// Router exposing `GET /metrics`.
pub fn router(store: Arc<MetricsStore>) -> Router {
    let state = AppState {
        store,
        last_good: Arc::new(RwLock::new(Vec::new())),
    };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = match state.store.export() {
        Ok(body) => {
            *state.last_good.write() = body.clone();
            body
        }
        Err(e) => {
            warn!("Export failed, serving previous snapshot: {}", e);
            state.last_good.read().clone()
        }
    };

    ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body)
}

/// Serve the scrape endpoint on `listener` until the server fails.
pub async fn serve(listener: TcpListener, store: Arc<MetricsStore>) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read listen address")?;
    info!("Metrics endpoint on http://{}/metrics", addr);

    axum::serve(listener, router(store))
        .await
        .context("Metrics server failed")
}
