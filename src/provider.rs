use async_trait::async_trait;
use tracing::debug;

use crate::error::ServiceError;
use crate::models::{GenerateRequest, GenerateResponse};

/// The upstream model call. Implementations report transient failures as
/// recoverable so the service layer can retry them.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ServiceError>;
}

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        // add http:// if not present
        let base_url = if base_url.starts_with("http") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ServiceError> {
        debug!(url = %self.base_url, model = %request.model, "Calling upstream");

        let res = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), body));
        }

        res.json::<GenerateResponse>()
            .await
            .map_err(|e| ServiceError::fatal(format!("Parse error: {e}")))
    }
}

// connection trouble is worth another try, a malformed request is not
fn transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ServiceError::recoverable(format!("Request failed: {e}"))
    } else {
        ServiceError::fatal(format!("Request failed: {e}"))
    }
}
