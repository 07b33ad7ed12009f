use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maintbot_gateway::{
    AiService, AppState, RateLimiter,
    assistant::AssistantService,
    cache::{CacheBackend, InMemoryCache, RedisCache},
    config::Args,
    metrics::CACHE_SIZE,
    provider::OllamaProvider,
    router,
};

const SERVICE_NAME: &str = "assistant";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments
    let args = Args::parse();

    let rate_limiter = Arc::new(RateLimiter::new(args.rate_limit_config()));

    let (cache, memory_cache): (Arc<dyn CacheBackend>, Option<Arc<InMemoryCache>>) =
        match &args.redis_url {
            Some(url) => {
                tracing::info!("Using redis cache");
                let redis: Arc<dyn CacheBackend> = Arc::new(RedisCache::open(url)?);
                (redis, None)
            }
            None => {
                let memory = Arc::new(InMemoryCache::new());
                spawn_cache_housekeeping(Arc::clone(&memory));
                let backend: Arc<dyn CacheBackend> = memory.clone();
                (backend, Some(memory))
            }
        };

    let provider = Arc::new(OllamaProvider::new(reqwest::Client::new(), &args.upstream_url));
    tracing::info!(upstream = %provider.base_url(), "Forwarding to upstream");

    let service = AiService::new(args.service_config(SERVICE_NAME), cache);
    let state = Arc::new(AppState {
        assistant: AssistantService::new(service, provider),
        rate_limiter: Arc::clone(&rate_limiter),
        memory_cache,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        cache_ttl_secs = args.cache_ttl,
        caching = !args.disable_cache,
        rate_limit = args.rate_limit,
        rate_window_secs = args.rate_window,
        "Gateway running on http://{}",
        addr
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    rate_limiter.destroy();
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

// expired entries are otherwise only dropped when read
fn spawn_cache_housekeeping(cache: Arc<InMemoryCache>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = cache.purge_expired();
            CACHE_SIZE.set(cache.len() as f64);
            if purged > 0 {
                tracing::debug!(purged, "Purged expired cache entries");
            }
        }
    });
}
