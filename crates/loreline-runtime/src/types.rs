use loreline_core::{CitationItem, PolicyMode};
use serde::{Deserialize, Serialize};

/// One user turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub tenant_id: String,
    pub site_id: String,
    pub npc_id: String,
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl ChatRequest {
    /// Queries are bounded to 1..=1000 characters.
    pub fn validate(&self) -> Result<(), String> {
        let len = self.query.chars().count();
        if len == 0 {
            return Err("query must not be empty".to_string());
        }
        if len > 1000 {
            return Err(format!("query too long: {} chars (max 1000)", len));
        }
        if self.tenant_id.is_empty() || self.site_id.is_empty() || self.npc_id.is_empty() {
            return Err("tenant_id, site_id and npc_id are required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub trace_id: String,
    pub session_id: String,
    pub policy_mode: PolicyMode,
    pub answer_text: String,
    pub citations: Vec<CitationItem>,
    pub followup_questions: Vec<String>,
    pub npc_name: String,
    pub latency_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str) -> ChatRequest {
        ChatRequest {
            tenant_id: "t1".to_string(),
            site_id: "s1".to_string(),
            npc_id: "ancestor".to_string(),
            query: query.to_string(),
            user_id: None,
            session_id: None,
            trace_id: None,
        }
    }

    #[test]
    fn query_length_bounds() {
        assert!(request("你好").validate().is_ok());
        assert!(request("").validate().is_err());
        assert!(request(&"x".repeat(1001)).validate().is_err());
        assert!(request(&"x".repeat(1000)).validate().is_ok());
    }
}
