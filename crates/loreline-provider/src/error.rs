use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified LLM failure kinds. Only transient kinds are retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorType {
    Auth,
    RateLimit,
    Timeout,
    Network,
    Server,
    InvalidRequest,
    ContentFilter,
    Unknown,
}

impl LlmErrorType {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            LlmErrorType::RateLimit
                | LlmErrorType::Timeout
                | LlmErrorType::Network
                | LlmErrorType::Server
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmErrorType::Auth => "auth",
            LlmErrorType::RateLimit => "rate_limit",
            LlmErrorType::Timeout => "timeout",
            LlmErrorType::Network => "network",
            LlmErrorType::Server => "server",
            LlmErrorType::InvalidRequest => "invalid_request",
            LlmErrorType::ContentFilter => "content_filter",
            LlmErrorType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("LLM error ({}): {message}", error_type.as_str())]
pub struct LlmError {
    pub error_type: LlmErrorType,
    pub message: String,
    pub status_code: Option<u16>,
    pub retryable: bool,
}

impl LlmError {
    pub fn new(error_type: LlmErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            status_code: None,
            retryable: error_type.retryable(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(LlmErrorType::RateLimit.retryable());
        assert!(LlmErrorType::Timeout.retryable());
        assert!(LlmErrorType::Network.retryable());
        assert!(LlmErrorType::Server.retryable());
        assert!(!LlmErrorType::Auth.retryable());
        assert!(!LlmErrorType::InvalidRequest.retryable());
        assert!(!LlmErrorType::ContentFilter.retryable());
        assert!(!LlmErrorType::Unknown.retryable());
    }
}
