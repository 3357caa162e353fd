//! Prometheus scrape endpoint.

use axum::http::header;
use axum::response::IntoResponse;
use tracing::error;

use crate::http::{AppError, AppResult};
use relaycast_core::metrics::gather_metrics;

/// Render all registered metrics in Prometheus text exposition format.
pub async fn metrics_handler() -> AppResult<impl IntoResponse> {
    let body = gather_metrics().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        AppError::internal_server_error("Failed to encode metrics")
    })?;

    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
