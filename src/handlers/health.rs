use axum::{Json, extract::State, response::IntoResponse};
use crate::state::AppState;
use crate::models::iso_timestamp;

// health handler
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "started_at": iso_timestamp(&state.started_at),
        "connections": state.tracker.hub().connection_count(),
    }))
}
