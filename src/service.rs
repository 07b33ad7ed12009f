//! Shared execution wrapper for AI-backed features.
//!
//! Feature code owns an [`AiService`] and routes its upstream calls through
//! it instead of inheriting the behavior:
//!
//! - [`AiService::validate`] turns raw JSON into a checked request type
//! - [`AiService::execute_with_retry`] bounds each attempt by the configured
//!   timeout and retries recoverable failures with exponential backoff
//! - [`AiService::check_cache`] / [`AiService::set_cache`] give best-effort
//!   read-through, write-after caching; backend trouble is logged, never
//!   returned
//! - [`AiService::cached`] composes all of it for one cache key

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::cache::CacheBackend;
use crate::error::{CacheError, ServiceError, ValidationIssue};
use crate::metrics::{CACHE_HITS, CACHE_MISSES, RETRIES_TOTAL};

/// Settings for one AI-backed service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Cache key namespace and log tag.
    pub service_name: String,
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    /// Total attempts, including the first. Never below 1.
    pub max_retries: u32,
    pub enable_caching: bool,
    pub cache_ttl: Duration,
    /// Delay after the first failed attempt; doubles after each later one.
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl ServiceConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            enable_caching: true,
            cache_ttl: Duration::from_secs(3600),
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n.max(1);
        self
    }

    pub fn enable_caching(mut self, enabled: bool) -> Self {
        self.enable_caching = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.max_backoff = max;
        self
    }

    /// Wait after failed attempt `attempt` (1-indexed): 1s, 2s, 4s, ...
    /// capped at `max_backoff`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Checks a request beyond what deserialization already enforces.
pub trait Validate {
    fn validate(&self) -> Result<(), Vec<ValidationIssue>> {
        Ok(())
    }
}

pub struct AiService {
    config: ServiceConfig,
    cache: Arc<dyn CacheBackend>,
    // one gate per key currently being computed through `cached`
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl AiService {
    pub fn new(config: ServiceConfig, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            config,
            cache,
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.service_name
    }

    /// Parse and check a raw payload.
    pub fn validate<T>(&self, data: serde_json::Value) -> Result<T, ServiceError>
    where
        T: DeserializeOwned + Validate,
    {
        let parsed: T = serde_json::from_value(data).map_err(|e| {
            self.validation_error(vec![ValidationIssue::new("", e.to_string())])
        })?;
        parsed.validate().map_err(|issues| self.validation_error(issues))?;
        Ok(parsed)
    }

    fn validation_error(&self, issues: Vec<ValidationIssue>) -> ServiceError {
        debug!(service = %self.name(), issues = issues.len(), "Validation failed");
        ServiceError::Validation {
            service: self.config.service_name.clone(),
            issues,
        }
    }

    /// Run `operation` until it succeeds, fails for good, or the attempt
    /// budget is spent. Each attempt is raced against the timeout.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match timeout(self.config.timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout {
                    service: self.config.service_name.clone(),
                    after: self.config.timeout,
                }),
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(service = %self.name(), attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_recoverable() {
                warn!(service = %self.name(), attempt, error = %error, "Non-recoverable error");
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!(service = %self.name(), attempt, error = %error, "Retries exhausted");
                return Err(error);
            }

            let backoff = self.config.backoff_delay(attempt);
            RETRIES_TOTAL.inc();
            warn!(
                service = %self.name(),
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Retrying after backoff"
            );
            sleep(backoff).await;
        }
    }

    /// Namespaced, order-preserving key: `service:part1:part2`.
    pub fn build_cache_key<S: AsRef<str>>(&self, parts: &[S]) -> String {
        let mut key = self.config.service_name.clone();
        for part in parts {
            key.push(':');
            key.push_str(part.as_ref());
        }
        key
    }

    pub async fn check_cache<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.config.enable_caching {
            return None;
        }
        let hit = self.lookup(key).await;
        if hit.is_some() {
            CACHE_HITS.inc();
            debug!(service = %self.name(), key, "Cache hit");
        } else {
            CACHE_MISSES.inc();
        }
        hit
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.cache.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(service = %self.name(), key, error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(service = %self.name(), key, error = %e, "Dropping undecodable cache entry");
                if let Err(e) = self.cache.delete(key).await {
                    warn!(service = %self.name(), key, error = %e, "Cache delete failed");
                }
                None
            }
        }
    }

    pub async fn set_cache<T: Serialize>(&self, key: &str, value: &T) {
        if !self.config.enable_caching {
            return;
        }
        let raw = match encode(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(service = %self.name(), key, error = %e, "Could not serialize cache value");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, raw, Some(self.config.cache_ttl)).await {
            warn!(service = %self.name(), key, error = %e, "Cache write failed");
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            warn!(service = %self.name(), key, error = %e, "Cache delete failed");
        }
    }

    /// Cached result for `key`, computing it through
    /// [`execute_with_retry`](Self::execute_with_retry) on a miss. Concurrent
    /// misses on the same key wait for the first computation instead of
    /// repeating it. Failures are never cached.
    pub async fn cached<T, F, Fut>(&self, key: &str, operation: F) -> Result<T, ServiceError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        if let Some(hit) = self.check_cache(key).await {
            return Ok(hit);
        }
        if !self.config.enable_caching {
            return self.execute_with_retry(operation).await;
        }

        let gate = InFlight::join(&self.in_flight, key);
        let _guard = gate.lock().await;
        // whoever held the gate before us may have filled the entry
        match self.lookup(key).await {
            Some(hit) => {
                CACHE_HITS.inc();
                debug!(service = %self.name(), key, "Collapsed onto in-flight result");
                Ok(hit)
            }
            None => {
                let value = self.execute_with_retry(operation).await?;
                self.set_cache(key, &value).await;
                Ok(value)
            }
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, CacheError> {
    Ok(serde_json::to_string(value)?)
}

/// Membership in the gate for one key. Dropping it, including when the
/// owning future is cancelled, removes the map entry once nobody else holds
/// the gate.
struct InFlight<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    gate: Arc<Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn join(map: &'a DashMap<String, Arc<Mutex<()>>>, key: &'a str) -> Self {
        let gate = Arc::clone(map.entry(key.to_string()).or_default().value());
        Self { map, key, gate }
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // release our clone first so the count below only sees other holders
        drop(std::mem::take(&mut self.gate));
        self.map
            .remove_if(self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}
