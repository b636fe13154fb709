use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One audit row per generation attempt that completed (success or final
/// failure). Collected by the provider and drained by the dialog runtime
/// into the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAuditRecord {
    pub trace_id: String,
    pub provider: String,
    pub model: String,
    pub request_hash: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub latency_ms: u64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Append-only audit buffer shared by provider implementations.
#[derive(Debug, Default)]
pub struct AuditSink {
    records: Mutex<Vec<LlmAuditRecord>>,
}

impl AuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: LlmAuditRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn drain(&self) -> Vec<LlmAuditRecord> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }
}
