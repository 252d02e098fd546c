//! # Metrics Endpoint
//!
//! Serves a node's Prometheus registry at `/metrics`. The registry itself
//! lives in the protocol crate, one per node.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use murmur_protocol::metrics::NodeMetrics;

/// Renders `metrics` in the Prometheus text format.
pub fn render(metrics: &NodeMetrics) -> Response {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

/// `GET /metrics`.
pub async fn metrics_handler(State(state): State<crate::api::AppState>) -> Response {
    render(state.node.metrics())
}
