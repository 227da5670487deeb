//! HTTP and WebSocket route handlers for the evaluation service.

pub mod clean;
pub mod health;
pub mod metrics;
pub mod output;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::relay;
use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - POST /evaluations/clean - Remove a finished evaluation
/// - GET /evaluations/{evaluation_name}/output - Download rendered output
/// - GET /ws/channel/{channel_name} - Relay a job channel over WebSocket
/// - GET /health - Health check
/// - GET /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(clean::router())
        .merge(output::router())
        .merge(health::router())
        .merge(metrics::router())
        .route("/ws/channel/{channel_name}", get(relay::ws_handler))
        .route("/ws/channel/{channel_name}/", get(relay::ws_handler))
        .with_state(state)
}
