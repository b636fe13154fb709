use async_trait::async_trait;
use std::time::Instant;

use crate::audit::{AuditSink, LlmAuditRecord};
use crate::error::LlmError;
use crate::types::{request_hash, LlmRequest, LlmResponse};
use crate::{estimate_tokens, LlmProvider};

const DEFAULT_CONSERVATIVE_TEXT: &str =
    "这个问题我不太确定具体细节，建议您查阅相关文献记载。";

/// Deterministic offline provider.
///
/// With citations present, the response restates the first citation; without
/// citations it returns a conservative template. Same input, same output,
/// which is what the end-to-end tests rely on.
pub struct SandboxLlmProvider {
    model: String,
    audits: AuditSink,
}

impl SandboxLlmProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            audits: AuditSink::new(),
        }
    }
}

impl Default for SandboxLlmProvider {
    fn default() -> Self {
        Self::new("sandbox-chat-1")
    }
}

#[async_trait]
impl LlmProvider for SandboxLlmProvider {
    fn provider_name(&self) -> &str {
        "sandbox"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();

        let npc_name = request
            .context
            .get("npc_name")
            .and_then(|v| v.as_str())
            .unwrap_or("我");

        let text = match request.citations.first() {
            Some(citation) => {
                let excerpt = citation.excerpt.as_deref().unwrap_or("");
                format!(
                    "关于「{}」，{}记得这样一段：{}。这些都有据可查。",
                    citation.title, npc_name, excerpt
                )
            }
            None => DEFAULT_CONSERVATIVE_TEXT.to_string(),
        };

        let response = LlmResponse {
            tokens_input: estimate_tokens(&request.system_prompt)
                + estimate_tokens(&request.user_message),
            tokens_output: estimate_tokens(&text),
            text,
            model: self.model.clone(),
            finish_reason: "stop".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
            raw: None,
        };

        self.audits.record(LlmAuditRecord {
            trace_id: request.trace_id.clone(),
            provider: self.provider_name().to_string(),
            model: self.model.clone(),
            request_hash: request_hash(&request.system_prompt, &request.user_message),
            tokens_input: response.tokens_input,
            tokens_output: response.tokens_output,
            latency_ms: response.latency_ms,
            status: "success".to_string(),
            error_type: None,
            error_message: None,
        });

        Ok(response)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn drain_audits(&self) -> Vec<LlmAuditRecord> {
        self.audits.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CitationRef;

    fn request(citations: Vec<CitationRef>) -> LlmRequest {
        LlmRequest {
            system_prompt: "你是老严。".to_string(),
            user_message: "严氏家训有哪些？".to_string(),
            context: serde_json::Map::new(),
            citations,
            max_tokens: 500,
            temperature: 0.7,
            trace_id: "trace-test".to_string(),
            npc_id: Some("ancestor".to_string()),
        }
    }

    #[tokio::test]
    async fn cited_response_mentions_the_citation() {
        let provider = SandboxLlmProvider::default();
        let resp = provider
            .generate(&request(vec![CitationRef {
                id: "e1".to_string(),
                title: "严氏家训".to_string(),
                source_ref: None,
                excerpt: Some("一曰孝悌为本".to_string()),
            }]))
            .await
            .unwrap();
        assert!(resp.text.contains("严氏家训"));
        assert!(resp.text.contains("一曰孝悌为本"));
        assert_eq!(resp.finish_reason, "stop");
        assert_eq!(provider.drain_audits().len(), 1);
    }

    #[tokio::test]
    async fn uncited_response_is_conservative_and_deterministic() {
        let provider = SandboxLlmProvider::default();
        let a = provider.generate(&request(vec![])).await.unwrap();
        let b = provider.generate(&request(vec![])).await.unwrap();
        assert_eq!(a.text, b.text);
        assert!(a.text.contains("不太确定"));
    }
}
