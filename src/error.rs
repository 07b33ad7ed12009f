use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single problem found while validating an incoming payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Dotted path of the offending field, empty for the whole payload.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Errors produced by AI-backed services and the gateway around them.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input failed validation. Never retried.
    #[error("[{service}] validation failed: {}", join_issues(.issues))]
    Validation {
        service: String,
        issues: Vec<ValidationIssue>,
    },

    /// The remote call did not finish in time.
    #[error("[{service}] operation timed out after {}ms", .after.as_millis())]
    Timeout { service: String, after: Duration },

    /// The upstream provider failed.
    #[error("upstream error{}: {message}", status_suffix(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
        recoverable: bool,
    },

    /// Caller exceeded its request quota.
    #[error("rate limit exceeded, retry in {}s", retry_after_secs(.retry_after))]
    RateLimited { retry_after: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Transient upstream failure worth retrying (5xx, network blip).
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: message.into(),
            recoverable: true,
        }
    }

    /// Upstream failure that retrying will not fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: message.into(),
            recoverable: false,
        }
    }

    /// Classify an upstream HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status),
            message: message.into(),
            recoverable: status == 429 || (500..=599).contains(&status),
        }
    }

    /// Only timeouts and upstream errors flagged recoverable are retried.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Upstream { recoverable, .. } => *recoverable,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" {s}")).unwrap_or_default()
}

// Round up so a client never retries before the window opens.
fn retry_after_secs(d: &Duration) -> u64 {
    d.as_millis().div_ceil(1000) as u64
}

/// Failures of a cache backend. These never reach callers of the service
/// layer; they are logged and treated as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    issues: Option<Vec<ValidationIssue>>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = match &self {
            Self::RateLimited { retry_after } => Some(retry_after_secs(retry_after)),
            _ => None,
        };
        let body = ErrorResponse {
            code: status.as_u16(),
            error_message: self.to_string(),
            issues: match self {
                Self::Validation { issues, .. } => Some(issues),
                _ => None,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
