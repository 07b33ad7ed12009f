use axum::extract::rejection::JsonRejection;
use axum::{Json, extract::State};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ServiceError, ValidationIssue};
use crate::metrics::REQUEST_LATENCY;
use crate::models::GenerateResponse;
use crate::state::AppState;

// Raw JSON in. Bodies that are not JSON at all are reported the same way as
// well-formed payloads of the wrong shape.
pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ServiceError> {
    let Json(payload) = payload.map_err(|rejection| ServiceError::Validation {
        service: state.assistant.ai().name().to_string(),
        issues: vec![ValidationIssue::new("", rejection.body_text())],
    })?;

    let start_time = Instant::now();

    let result = state.assistant.generate(payload).await;

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
    result.map(Json)
}
