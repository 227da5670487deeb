// crates/server/src/lib.rs
//! Evaluation service library.
//!
//! Axum HTTP server exposing evaluation cleanup and output download, a
//! WebSocket relay onto per-job channels, and the service manager that runs
//! the listener alongside recurring background checks.

pub mod config;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod routes;
pub mod service;
pub mod state;
pub mod tasks;
pub mod tls;

pub use config::Config;
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use service::{ServiceError, ServiceManager};
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - Cleanup, output, relay, health and metrics routes
/// - CORS (allows any origin)
/// - Request tracing
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
