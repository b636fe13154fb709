//! Wire types for the tool surface: call envelope, audit, and the typed
//! input/output of every built-in tool. Inputs are validated by
//! deserialization; a shape mismatch is a `ValidationError` and is never
//! retried.

use loreline_core::ToolContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use loreline_evidence::{RetrievalOutput, RetrievalStrategy};

// --- call envelope ---------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    pub context: ToolContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAudit {
    pub trace_id: String,
    pub tool_name: String,
    pub status: String,
    pub latency_ms: i64,
    pub request_payload_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// `success = false` is a normal tool-level outcome, not a protocol error;
/// the HTTP layer still answers 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub audit: ToolAudit,
}

// --- get_npc_profile -------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GetNpcProfileInput {
    pub npc_id: String,
    #[serde(default)]
    pub version: Option<i64>,
}

/// The persona view handed to the dialog runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcProfileView {
    pub npc_id: String,
    pub version: i64,
    pub active: bool,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub npc_type: String,
    #[serde(default)]
    pub persona: Value,
    #[serde(default)]
    pub knowledge_domains: Vec<String>,
    #[serde(default)]
    pub greeting_templates: Vec<String>,
    #[serde(default)]
    pub fallback_responses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_length: Option<u32>,
    #[serde(default)]
    pub must_cite_sources: bool,
}

impl NpcProfileView {
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Forbidden topics from the persona constraints block.
    pub fn forbidden_topics(&self) -> Vec<String> {
        self.persona
            .get("constraints")
            .and_then(|c| c.get("forbidden_topics"))
            .and_then(|t| t.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// --- get_prompt_active -----------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GetPromptActiveInput {
    pub npc_id: String,
    #[serde(default = "default_prompt_type")]
    pub prompt_type: String,
}

fn default_prompt_type() -> String {
    "system".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptInfo {
    pub npc_id: String,
    pub prompt_type: String,
    pub prompt_text: String,
    pub version: i64,
    #[serde(default)]
    pub metadata: Value,
}

impl PromptInfo {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }

    pub fn policy(&self) -> Option<&Value> {
        self.metadata.get("policy")
    }
}

// --- search_content --------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchContentInput {
    pub query: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_content_limit")]
    pub limit: usize,
}

fn default_content_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub content_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    pub credibility_score: f64,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchContentOutput {
    pub items: Vec<ContentItem>,
    pub total: usize,
    pub query: String,
}

// --- get_site_map ----------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GetSiteMapInput {
    #[serde(default = "bool_true")]
    pub include_pois: bool,
    #[serde(default)]
    pub include_routes: bool,
}

fn bool_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub poi_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSiteMapOutput {
    pub site_id: String,
    pub site_name: String,
    pub pois: Vec<PoiItem>,
    pub routes: Vec<Value>,
}

// --- create_draft_content --------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateDraftContentInput {
    pub content_type: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDraftContentOutput {
    pub content_id: String,
    pub status: String,
    pub created_at: String,
}

// --- log_user_event --------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogUserEventInput {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Value,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogUserEventOutput {
    pub event_id: String,
    pub logged_at: String,
}

// --- retrieve_evidence -----------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrieveEvidenceInput {
    pub query: String,
    #[serde(default)]
    pub strategy: Option<RetrievalStrategy>,
    #[serde(default = "default_evidence_limit")]
    pub limit: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub domains: Option<Vec<String>>,
    #[serde(default = "bool_true")]
    pub use_trgm: bool,
}

fn default_evidence_limit() -> usize {
    5
}

fn default_min_score() -> f64 {
    0.3
}

pub type RetrieveEvidenceOutput = RetrievalOutput;

// --- feedback --------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitFeedbackInput {
    #[serde(default)]
    pub trace_id: Option<String>,
    pub feedback_type: String,
    pub severity: String,
    pub content: String,
    #[serde(default)]
    pub original_response: Option<String>,
    #[serde(default)]
    pub suggested_fix: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitFeedbackOutput {
    pub feedback_id: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListFeedbackInput {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub feedback_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default = "default_feedback_limit")]
    pub limit: usize,
}

fn default_feedback_limit() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub feedback_type: String,
    pub severity: String,
    pub content: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFeedbackOutput {
    pub items: Vec<FeedbackItem>,
    pub total: usize,
}
