use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool-call audit entry inside a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEntry {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub latency_ms: i64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Redacted call details (payload hash, intent labels, counts, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolCallEntry {
    pub fn new(name: impl Into<String>, status: impl Into<String>, latency_ms: i64) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            latency_ms,
            retry_count: 0,
            cache_hit: false,
            error: None,
            details: None,
        }
    }
}

/// The replayable record of one request. Appended partial on entry, then
/// updated with completion fields; history is immutable after completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: String,
    pub tenant_id: String,
    pub site_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npc_id: Option<String>,
    pub request_type: String,
    #[serde(default)]
    pub request_input: Value,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallEntry>,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    pub policy_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_input: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_output: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_snapshot: Option<Value>,
}

impl TraceRecord {
    /// A minimal partial record as written at request entry.
    pub fn begin(
        trace_id: impl Into<String>,
        tenant_id: impl Into<String>,
        site_id: impl Into<String>,
        request_type: impl Into<String>,
        started_at: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            tenant_id: tenant_id.into(),
            site_id: site_id.into(),
            session_id: None,
            npc_id: None,
            request_type: request_type.into(),
            request_input: Value::Null,
            tool_calls: Vec::new(),
            evidence_ids: Vec::new(),
            policy_mode: "normal".to_string(),
            policy_reason: None,
            response_output: None,
            prompt_version: None,
            prompt_source: None,
            persona_version: None,
            model_provider: None,
            model_name: None,
            tokens_input: None,
            tokens_output: None,
            latency_ms: None,
            status: "pending".to_string(),
            error: None,
            started_at: started_at.into(),
            completed_at: None,
            release_id: None,
            experiment_id: None,
            experiment_variant: None,
            strategy_snapshot: None,
        }
    }
}

/// Filters for ledger listing.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub session_id: Option<String>,
    pub npc_id: Option<String>,
    pub policy_mode: Option<String>,
    pub status: Option<String>,
    pub request_type: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub limit: usize,
}

/// Windowed aggregate over the ledger, the input to alert evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub window: String,
    pub total_turns: i64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub fallback_rate: f64,
    pub conservative_rate: f64,
    pub citation_rate: f64,
    pub avg_latency_ms: f64,
}

/// Per-variant aggregate for experiment comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSummary {
    pub variant: String,
    pub turns: i64,
    pub conservative_rate: f64,
    pub citation_rate: f64,
    pub avg_latency_ms: f64,
}
