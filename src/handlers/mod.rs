mod health;
mod metrics;
mod ws;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use ws::ws_handler;

use axum::{Router, routing::get};
use std::path::Path;
use tower_http::{services::ServeDir, trace::TraceLayer};
use crate::state::AppState;

// WebSocket endpoint, health, metrics; everything else comes from the static dir
pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
