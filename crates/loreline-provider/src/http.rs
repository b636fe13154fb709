//! HTTP LLM provider speaking the common chat-completions wire shape.
//!
//! Each attempt runs under the configured timeout; transient failures are
//! retried with exponential backoff (`base * 2^attempt`), non-retryable
//! errors short-circuit immediately.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::audit::{AuditSink, LlmAuditRecord};
use crate::error::{LlmError, LlmErrorType};
use crate::types::{request_hash, LlmRequest, LlmResponse};
use crate::{estimate_tokens, LlmProvider};

pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_retries: u32,
    base_retry_delay: Duration,
    audits: AuditSink,
}

impl HttpLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
        base_retry_delay: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            max_retries,
            base_retry_delay,
            audits: AuditSink::new(),
        }
    }

    /// The user message with reference material appended, so grounding
    /// travels inside the turn rather than as provider-specific fields.
    fn build_user_content(request: &LlmRequest) -> String {
        let mut content = request.user_message.clone();
        if !request.citations.is_empty() {
            content.push_str("\n\n【参考资料】\n");
            for (i, citation) in request.citations.iter().enumerate() {
                let excerpt: String = citation
                    .excerpt
                    .as_deref()
                    .unwrap_or("")
                    .chars()
                    .take(200)
                    .collect();
                content.push_str(&format!("{}. {}: {}\n", i + 1, citation.title, excerpt));
            }
        }
        content
    }

    async fn attempt(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": Self::build_user_content(request)},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::new(LlmErrorType::Timeout, e.to_string())
            } else if e.is_connect() {
                LlmError::new(LlmErrorType::Network, e.to_string())
            } else {
                LlmError::new(LlmErrorType::Unknown, e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::new(LlmErrorType::Unknown, format!("parse error: {}", e)))?;
        parse_completion(&raw, &self.model)
    }
}

fn classify_status(status: u16, body: &str) -> LlmError {
    let message = format!("API error {}: {}", status, body.chars().take(200).collect::<String>());
    let error_type = match status {
        401 | 403 => LlmErrorType::Auth,
        429 => LlmErrorType::RateLimit,
        400 | 404 | 422 => LlmErrorType::InvalidRequest,
        s if s >= 500 => LlmErrorType::Server,
        _ => LlmErrorType::Unknown,
    };
    // Some backends report refusals as a 400 with an explicit marker.
    let error_type = if body.contains("content_filter") {
        LlmErrorType::ContentFilter
    } else {
        error_type
    };
    LlmError::new(error_type, message).with_status(status)
}

#[derive(Deserialize)]
struct Completion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_completion(raw: &serde_json::Value, model: &str) -> Result<LlmResponse, LlmError> {
    let parsed: Completion = serde_json::from_value(raw.clone())
        .map_err(|e| LlmError::new(LlmErrorType::Unknown, format!("parse error: {}", e)))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::new(LlmErrorType::Unknown, "empty choices"))?;

    let text = choice.message.content;
    let (tokens_input, tokens_output) = match parsed.usage {
        Some(u) => (u.prompt_tokens, u.completion_tokens),
        None => (0, estimate_tokens(&text)),
    };

    Ok(LlmResponse {
        tokens_input,
        tokens_output,
        finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        text,
        model: model.to_string(),
        latency_ms: 0,
        raw: Some(raw.clone()),
    })
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn provider_name(&self) -> &str {
        "http"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let hash = request_hash(&request.system_prompt, &request.user_message);
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..=self.max_retries {
            match self.attempt(request).await {
                Ok(mut response) => {
                    response.latency_ms = start.elapsed().as_millis() as u64;
                    debug!(
                        model = %self.model,
                        latency_ms = response.latency_ms,
                        attempt,
                        "generation succeeded"
                    );
                    self.audits.record(LlmAuditRecord {
                        trace_id: request.trace_id.clone(),
                        provider: self.provider_name().to_string(),
                        model: self.model.clone(),
                        request_hash: hash.clone(),
                        tokens_input: response.tokens_input,
                        tokens_output: response.tokens_output,
                        latency_ms: response.latency_ms,
                        status: "success".to_string(),
                        error_type: None,
                        error_message: None,
                    });
                    return Ok(response);
                }
                Err(e) => {
                    warn!(
                        error_type = e.error_type.as_str(),
                        error = %e.message,
                        attempt,
                        "generation attempt failed"
                    );
                    let retryable = e.retryable;
                    last_error = Some(e);
                    if !retryable || attempt == self.max_retries {
                        break;
                    }
                    let delay = self.base_retry_delay * 2u32.pow(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            LlmError::new(LlmErrorType::Unknown, "no attempt was made")
        });
        self.audits.record(LlmAuditRecord {
            trace_id: request.trace_id.clone(),
            provider: self.provider_name().to_string(),
            model: self.model.clone(),
            request_hash: hash,
            tokens_input: 0,
            tokens_output: 0,
            latency_ms: start.elapsed().as_millis() as u64,
            status: "error".to_string(),
            error_type: Some(error.error_type.as_str().to_string()),
            error_message: Some(error.message.clone()),
        });
        Err(error)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        matches!(req.send().await, Ok(r) if r.status().is_success())
    }

    fn drain_audits(&self) -> Vec<LlmAuditRecord> {
        self.audits.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(401, "").error_type, LlmErrorType::Auth);
        assert_eq!(classify_status(429, "").error_type, LlmErrorType::RateLimit);
        assert_eq!(classify_status(400, "").error_type, LlmErrorType::InvalidRequest);
        assert_eq!(classify_status(502, "").error_type, LlmErrorType::Server);
        assert_eq!(
            classify_status(400, "{\"error\":{\"code\":\"content_filter\"}}").error_type,
            LlmErrorType::ContentFilter
        );
    }

    #[test]
    fn parse_completion_reads_usage() {
        let raw = json!({
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let resp = parse_completion(&raw, "m").unwrap();
        assert_eq!(resp.text, "hello");
        assert_eq!(resp.tokens_input, 12);
        assert_eq!(resp.tokens_output, 3);
    }

    #[test]
    fn citations_are_appended_to_user_content() {
        let request = LlmRequest {
            system_prompt: String::new(),
            user_message: "问题".to_string(),
            context: serde_json::Map::new(),
            citations: vec![crate::types::CitationRef {
                id: "e1".to_string(),
                title: "严氏家训".to_string(),
                source_ref: None,
                excerpt: Some("一曰孝悌为本".to_string()),
            }],
            max_tokens: 100,
            temperature: 0.7,
            trace_id: "t".to_string(),
            npc_id: None,
        };
        let content = HttpLlmProvider::build_user_content(&request);
        assert!(content.contains("【参考资料】"));
        assert!(content.contains("1. 严氏家训"));
    }
}
