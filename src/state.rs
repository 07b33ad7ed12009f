use std::sync::Arc;

use crate::assistant::AssistantService;
use crate::cache::InMemoryCache;
use crate::rate_limit::RateLimiter;

// app's shared state
pub struct AppState {
    pub assistant: AssistantService,
    pub rate_limiter: Arc<RateLimiter>,
    // set when the in-process backend is in use, for the size gauge
    pub memory_cache: Option<Arc<InMemoryCache>>,
}
