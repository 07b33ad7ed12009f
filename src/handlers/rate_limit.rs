use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::error::ServiceError;
use crate::metrics::{RATE_LIMITED, REQUEST_TOTAL};
use crate::state::AppState;

/// Caller identity for rate limiting: `x-real-ip`, then the first
/// `x-forwarded-for` hop, then the peer address.
pub fn client_ip(req: &Request) -> String {
    let headers = req.headers();
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
                .map(str::to_string)
        })
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    REQUEST_TOTAL.inc();
    let ip = client_ip(&req);

    if !state.rate_limiter.check_limit(&ip) {
        RATE_LIMITED.inc();
        let retry_after = state.rate_limiter.retry_after(&ip);
        warn!(ip = %ip, retry_after_ms = retry_after.as_millis() as u64, "Rate limit exceeded");
        return ServiceError::RateLimited { retry_after }.into_response();
    }

    let remaining = state.rate_limiter.remaining(&ip);
    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    response
}
