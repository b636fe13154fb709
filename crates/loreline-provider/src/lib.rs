//! Uniform async LLM interface.
//!
//! Providers classify failures into a fixed taxonomy, retry transient kinds
//! with exponential backoff, and write an audit record per generation. The
//! sandbox provider produces deterministic canned responses for offline
//! deployments and tests.

pub mod audit;
pub mod error;
pub mod http;
pub mod sandbox;
pub mod types;

use async_trait::async_trait;
use tracing::warn;

pub use audit::{AuditSink, LlmAuditRecord};
pub use error::{LlmError, LlmErrorType};
pub use http::HttpLlmProvider;
pub use sandbox::SandboxLlmProvider;
pub use types::{request_hash, CitationRef, LlmRequest, LlmResponse};

/// Common interface for all LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;

    /// Generate a response. Retries transient errors internally; the final
    /// error is returned classified.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Never-failing variant: on final failure a synthetic response with
    /// `finish_reason = "fallback"` carries `fallback_text`.
    async fn generate_with_fallback(&self, request: &LlmRequest, fallback_text: &str) -> LlmResponse {
        match self.generate(request).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    provider = self.provider_name(),
                    error_type = e.error_type.as_str(),
                    error = %e.message,
                    "generation failed, returning fallback response"
                );
                LlmResponse::fallback(fallback_text)
            }
        }
    }

    async fn health_check(&self) -> bool;

    /// Drain audit records accumulated since the last drain.
    fn drain_audits(&self) -> Vec<LlmAuditRecord> {
        Vec::new()
    }
}

/// Rough token estimate used when the backend reports no usage: ~4 chars
/// per token, floor 1 for non-empty text.
pub(crate) fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    if chars == 0 {
        0
    } else {
        (chars / 4).max(1)
    }
}
