use std::sync::Arc;
use tracing::info;

use crate::cache::fingerprint;
use crate::error::ServiceError;
use crate::models::{GenerateRequest, GenerateResponse};
use crate::provider::CompletionProvider;
use crate::service::AiService;

/// Maintenance-assistant completions: validate, dedupe through the cache,
/// then call the provider with retries.
pub struct AssistantService {
    ai: AiService,
    provider: Arc<dyn CompletionProvider>,
}

impl AssistantService {
    pub fn new(ai: AiService, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { ai, provider }
    }

    pub fn ai(&self) -> &AiService {
        &self.ai
    }

    // model + hash of the full prompt text (system and user)
    pub fn cache_key(&self, request: &GenerateRequest) -> String {
        let text = format!(
            "{}\u{0}{}",
            request.system.as_deref().unwrap_or_default(),
            request.prompt
        );
        self.ai
            .build_cache_key(&[request.model.as_str(), fingerprint(&text).as_str()])
    }

    pub async fn generate(&self, payload: serde_json::Value) -> Result<GenerateResponse, ServiceError> {
        let request: GenerateRequest = self.ai.validate(payload)?;
        let key = self.cache_key(&request);
        let provider = &self.provider;

        let response = self
            .ai
            .cached(&key, || provider.generate(&request))
            .await?;

        info!(
            service = %self.ai.name(),
            model = %response.model,
            chars = response.response.len(),
            "Completion served"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::service::ServiceConfig;
    use async_trait::async_trait;

    struct Unused;

    #[async_trait]
    impl CompletionProvider for Unused {
        async fn generate(&self, _: &GenerateRequest) -> Result<GenerateResponse, ServiceError> {
            Err(ServiceError::fatal("not called"))
        }
    }

    fn assistant() -> AssistantService {
        let ai = AiService::new(ServiceConfig::new("assistant"), Arc::new(InMemoryCache::new()));
        AssistantService::new(ai, Arc::new(Unused))
    }

    fn request(prompt: &str, system: Option<&str>) -> GenerateRequest {
        GenerateRequest {
            model: "llama3".into(),
            prompt: prompt.into(),
            system: system.map(str::to_string),
            stream: false,
        }
    }

    #[test]
    fn test_cache_key_shape() {
        let svc = assistant();
        let key = svc.cache_key(&request("Torque spec for flange bolts", None));
        assert!(key.starts_with("assistant:llama3:"));
        assert_eq!(key, svc.cache_key(&request("Torque spec for flange bolts", None)));
    }

    #[test]
    fn test_system_prompt_changes_key() {
        let svc = assistant();
        assert_ne!(
            svc.cache_key(&request("Summarize shift", None)),
            svc.cache_key(&request("Summarize shift", Some("Answer in Spanish")))
        );
    }

    #[tokio::test]
    async fn test_invalid_payload_never_reaches_provider() {
        let err = assistant()
            .generate(serde_json::json!({ "model": "llama3" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }
}
