//! End-to-end through the axum router with a stubbed upstream.

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use maintbot_gateway::assistant::AssistantService;
use maintbot_gateway::cache::InMemoryCache;
use maintbot_gateway::models::{GenerateRequest, GenerateResponse};
use maintbot_gateway::provider::CompletionProvider;
use maintbot_gateway::{
    AiService, AppState, RateLimitConfig, RateLimiter, ServiceConfig, ServiceError, router,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tower::ServiceExt;

struct StubProvider {
    calls: AtomicU32,
    fail_with: Option<u16>,
}

impl StubProvider {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_with: None,
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_with: Some(status),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for StubProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_with {
            Some(status) => Err(ServiceError::from_status(status, "upstream said no")),
            None => Ok(GenerateResponse {
                model: request.model.clone(),
                response: format!("echo: {}", request.prompt),
            }),
        }
    }
}

fn app(provider: Arc<StubProvider>, max_requests: u32) -> Router {
    let cache = Arc::new(InMemoryCache::new());
    let service = AiService::new(
        ServiceConfig::new("assistant").max_retries(1),
        cache.clone(),
    );
    let state = Arc::new(AppState {
        assistant: AssistantService::new(service, provider),
        rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::new(
            Duration::from_secs(60),
            max_requests,
        ))),
        memory_cache: Some(cache),
    });
    router(state)
}

fn generate(ip: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", format!("{ip}, 172.16.0.1"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn prompt(text: &str) -> serde_json::Value {
    serde_json::json!({ "model": "llama3", "prompt": text })
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn generate_returns_upstream_answer() {
    let provider = StubProvider::ok();
    let app = app(provider.clone(), 10);

    let response = app
        .oneshot(generate("10.0.0.1", prompt("Bearing noise on conveyor 4")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
    let body = json_body(response).await;
    assert_eq!(body["model"], "llama3");
    assert_eq!(body["response"], "echo: Bearing noise on conveyor 4");
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn identical_requests_hit_the_cache() {
    let provider = StubProvider::ok();
    let app = app(provider.clone(), 10);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(generate("10.0.0.1", prompt("Lockout steps for press 2")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(provider.calls(), 1);

    let response = app
        .oneshot(generate("10.0.0.1", prompt("Lockout steps for press 3")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn over_quota_gets_429_with_retry_after() {
    let provider = StubProvider::ok();
    let app = app(provider.clone(), 2);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(generate("10.0.0.9", prompt("hello")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(generate("10.0.0.9", prompt("hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    assert_eq!(json_body(response).await["code"], 429);

    // a different client is unaffected
    let response = app
        .oneshot(generate("10.0.0.10", prompt("hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn invalid_payload_is_rejected_before_upstream() {
    let provider = StubProvider::ok();
    let app = app(provider.clone(), 10);

    let response = app
        .oneshot(generate("10.0.0.1", serde_json::json!({ "model": "", "prompt": " " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    let paths: Vec<&str> = body["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["model", "prompt"]);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn upstream_client_error_maps_to_bad_gateway() {
    let provider = StubProvider::failing(404);
    let app = app(provider.clone(), 10);

    let response = app
        .oneshot(generate("10.0.0.1", prompt("hello")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn health_and_metrics_are_not_rate_limited() {
    let app = app(StubProvider::ok(), 0);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("maintbot_cache_size"));
}

#[tokio::test]
async fn unparseable_body_gets_json_validation_error() {
    let provider = StubProvider::ok();
    let app = app(provider.clone(), 10);

    let malformed = Request::builder()
        .method("POST")
        .uri("/api/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "10.0.0.1")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(malformed).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], 400);
    assert!(body["error_message"].as_str().unwrap().contains("assistant"));
    let issues = body["issues"].as_array().unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0]["path"], "");

    // no content type at all
    let untyped = Request::builder()
        .method("POST")
        .uri("/api/generate")
        .header("x-forwarded-for", "10.0.0.1")
        .body(Body::from(prompt("hello").to_string()))
        .unwrap();
    let response = app.oneshot(untyped).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], 400);
    assert_eq!(provider.calls(), 0);
}
