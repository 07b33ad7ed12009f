use axum::extract::State;
use axum::http::StatusCode;
use std::sync::Arc;

use crate::metrics::{CACHE_SIZE, render};
use crate::state::AppState;

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, String)> {
    if let Some(cache) = &state.memory_cache {
        CACHE_SIZE.set(cache.len() as f64);
    }
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}
