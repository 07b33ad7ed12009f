//! Rate-limited, caching gateway in front of an LLM provider for
//! maintenance-assistant clients.
//!
//! The reusable pieces are [`rate_limit::RateLimiter`] and
//! [`service::AiService`]; the rest wires them into an axum server.

use axum::{
    Router,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;

pub mod assistant;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod rate_limit;
pub mod service;
pub mod state;

pub use error::{CacheError, ServiceError, ValidationIssue};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use service::{AiService, ServiceConfig, Validate};
pub use state::AppState;

// Only the model route is rate limited; health and metrics stay open
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/generate", post(handlers::generate_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::rate_limit,
        ));

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(api)
        .with_state(state)
}
