use clap::Parser;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;
use crate::service::ServiceConfig;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "maintbot-gateway")]
#[command(about = "Rate-limited, caching gateway between maintenance assistants and an LLM provider")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "MAINTBOT_PORT", default_value_t = 8080)]
    pub port: u16,

    // Upstream model server
    #[arg(short, long, env = "MAINTBOT_UPSTREAM_URL", default_value = "http://localhost:11434")]
    pub upstream_url: String,

    // Redis for a shared cache; in-process memory when unset
    #[arg(long, env = "MAINTBOT_REDIS_URL")]
    pub redis_url: Option<String>,

    // Cache TTL in seconds
    #[arg(short, long, env = "MAINTBOT_CACHE_TTL", default_value_t = 3600)]
    pub cache_ttl: u64,

    #[arg(long, env = "MAINTBOT_DISABLE_CACHE", default_value_t = false)]
    pub disable_cache: bool,

    // Upstream call timeout in milliseconds
    #[arg(long, env = "MAINTBOT_TIMEOUT_MS", default_value_t = 30_000)]
    pub timeout_ms: u64,

    // Total attempts per upstream call
    #[arg(long, env = "MAINTBOT_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    // Rate limit max requests per window
    #[arg(long, env = "MAINTBOT_RATE_LIMIT", default_value_t = 10)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "MAINTBOT_RATE_WINDOW", default_value_t = 60)]
    pub rate_window: u64,

    // Seconds between sweeps of idle rate limit records
    #[arg(long, env = "MAINTBOT_RATE_CLEANUP_INTERVAL", default_value_t = 60)]
    pub rate_cleanup_interval: u64,
}

impl Args {
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(Duration::from_secs(self.rate_window), self.rate_limit)
            .cleanup_interval(Duration::from_secs(self.rate_cleanup_interval.max(1)))
    }

    pub fn service_config(&self, service_name: &str) -> ServiceConfig {
        ServiceConfig::new(service_name)
            .timeout(Duration::from_millis(self.timeout_ms))
            .max_retries(self.max_retries)
            .enable_caching(!self.disable_cache)
            .cache_ttl(Duration::from_secs(self.cache_ttl))
    }
}
