use chrono::{DateTime, Utc};
use crate::session::SessionTracker;

// app's shared state

#[derive(Clone)]
pub struct AppState {
    pub tracker: SessionTracker,
    pub started_at: DateTime<Utc>, // reported by /health
}
