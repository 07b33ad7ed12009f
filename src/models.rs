use serde::{Deserialize, Serialize};

use crate::error::ValidationIssue;
use crate::service::Validate;

pub const MAX_PROMPT_CHARS: usize = 32_000;

// Assistant request, forwarded upstream in Ollama's generate format
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

// Upstream response, also what gets cached
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
}

impl Validate for GenerateRequest {
    fn validate(&self) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        if self.model.trim().is_empty() {
            issues.push(ValidationIssue::new("model", "must not be empty"));
        }
        if self.prompt.trim().is_empty() {
            issues.push(ValidationIssue::new("prompt", "must not be empty"));
        } else if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            issues.push(ValidationIssue::new(
                "prompt",
                format!("must be at most {MAX_PROMPT_CHARS} characters"),
            ));
        }
        if self.stream {
            issues.push(ValidationIssue::new("stream", "streaming is not supported"));
        }

        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}
