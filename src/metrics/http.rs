use std::sync::Arc;

use axum::{extract::State, Json};

use super::collector::StatsSnapshot;
use crate::AppState;

// ─── GET /debug/vars ─────────────────────────────────────────────

/// Current processor stats as JSON.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

// ─── GET /health ─────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}
