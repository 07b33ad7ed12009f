use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    // how often idle identifiers are swept out
    pub cleanup_interval: Duration,
}

impl RateLimitConfig {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            cleanup_interval: Duration::from_secs(60),
        }
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

/// Sliding-window request gate keyed by caller identity (usually client IP).
///
/// Each identifier keeps the instants of its admitted requests. The window
/// is measured back from "now" on every call, so there are no bucket edges.
/// A timestamp exactly `window` old is already expired.
///
/// Construction spawns the periodic sweep, so it must happen inside a tokio
/// runtime. Call [`RateLimiter::destroy`] on shutdown.
pub struct RateLimiter {
    records: Arc<DashMap<String, VecDeque<Instant>>>,
    config: RateLimitConfig,
    cleanup: JoinHandle<()>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let records: Arc<DashMap<String, VecDeque<Instant>>> = Arc::new(DashMap::new());

        let sweep_records = Arc::clone(&records);
        let period = config.cleanup_interval;
        let window = config.window;
        let first_sweep = Instant::now() + period;
        let cleanup = tokio::spawn(async move {
            let mut ticker = interval_at(first_sweep, period);
            loop {
                ticker.tick().await;
                let removed = sweep(&sweep_records, window, Instant::now());
                if removed > 0 {
                    debug!(removed, remaining = sweep_records.len(), "Rate limiter sweep");
                }
            }
        });

        info!(
            max_requests = config.max_requests,
            window_ms = config.window.as_millis() as u64,
            "Rate limiter started"
        );

        Self {
            records,
            config,
            cleanup,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Admit or reject one request. Admission records the request.
    pub fn check_limit(&self, identifier: &str) -> bool {
        let now = Instant::now();

        // entry() holds the shard lock across prune + push
        let mut timestamps = self.records.entry(identifier.to_string()).or_default();
        prune(&mut timestamps, now, self.config.window);

        if timestamps.len() < self.config.max_requests as usize {
            timestamps.push_back(now);
            return true;
        }

        debug!(identifier, "Rate limit reached");
        false
    }

    /// How many more requests would be admitted right now.
    pub fn remaining(&self, identifier: &str) -> u32 {
        let now = Instant::now();
        let used = self
            .records
            .get(identifier)
            .map(|ts| ts.iter().filter(|t| is_live(**t, now, self.config.window)).count())
            .unwrap_or(0);

        self.config.max_requests.saturating_sub(used as u32)
    }

    /// Time until the oldest live request leaves the window. Zero when the
    /// identifier has nothing recorded.
    pub fn retry_after(&self, identifier: &str) -> Duration {
        let now = Instant::now();
        let window = self.config.window;

        self.records
            .get(identifier)
            .and_then(|ts| ts.iter().copied().find(|t| is_live(*t, now, window)))
            .map(|oldest| (oldest + window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Run one cleanup pass now, returning how many identifiers were dropped.
    pub fn sweep(&self) -> usize {
        sweep(&self.records, self.config.window, Instant::now())
    }

    pub fn tracked_identifiers(&self) -> usize {
        self.records.len()
    }

    /// Stop the background sweep and forget every identifier.
    pub fn destroy(&self) {
        if !self.cleanup.is_finished() {
            self.cleanup.abort();
            info!("Rate limiter stopped");
        }
        self.records.clear();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.cleanup.abort();
    }
}

fn is_live(t: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(t) < window
}

// timestamps are pushed in order, so expired ones sit at the front
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = timestamps.front() {
        if is_live(front, now, window) {
            break;
        }
        timestamps.pop_front();
    }
}

fn sweep(records: &DashMap<String, VecDeque<Instant>>, window: Duration, now: Instant) -> usize {
    let before = records.len();
    records.retain(|_, timestamps| {
        prune(timestamps, now, window);
        !timestamps.is_empty()
    });
    before.saturating_sub(records.len())
}
