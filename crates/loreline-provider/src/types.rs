use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Citation passed to the LLM as reference material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationRef {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_message: String,
    /// Free-form context (npc name, knowledge domains, ...). Providers may
    /// use it to shape the prompt; the core never dispatches on it.
    pub context: serde_json::Map<String, serde_json::Value>,
    pub citations: Vec<CitationRef>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub trace_id: String,
    pub npc_id: Option<String>,
}

/// Response from an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub finish_reason: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl LlmResponse {
    /// Synthetic response used when every attempt failed and the caller
    /// asked for graceful degradation.
    pub fn fallback(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: "fallback".to_string(),
            tokens_input: 0,
            tokens_output: 0,
            finish_reason: "fallback".to_string(),
            latency_ms: 0,
            raw: None,
        }
    }
}

/// Hash over the leading 100 characters of system and user text. Secrets in
/// the prompt tail never reach the audit trail.
pub fn request_hash(system_prompt: &str, user_message: &str) -> String {
    let head = |s: &str| s.chars().take(100).collect::<String>();
    let mut hasher = Sha256::new();
    hasher.update(head(system_prompt).as_bytes());
    hasher.update(b"|");
    hasher.update(head(user_message).as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_hash_ignores_prompt_tail() {
        let head: String = "x".repeat(100);
        let a = request_hash(&format!("{}secret-a", head), "hi");
        let b = request_hash(&format!("{}secret-b", head), "hi");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn fallback_response_shape() {
        let r = LlmResponse::fallback("sorry");
        assert_eq!(r.finish_reason, "fallback");
        assert_eq!(r.tokens_input, 0);
        assert_eq!(r.tokens_output, 0);
    }
}
