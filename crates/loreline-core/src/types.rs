use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque trace identifier (`trace-` + 16 hex chars of a UUIDv7).
///
/// UUIDv7 includes a timestamp, so trace ids sort roughly by creation time
/// in logs and in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(format!("trace-{}", &Uuid::now_v7().simple().to_string()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TraceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TraceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque session identifier (`session-` + 16 hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!(
            "session-{}",
            &Uuid::new_v4().simple().to_string()[..16]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tenant + site pair that scopes nearly every entity in the platform.
///
/// Searches, cache keys, and ledger rows are all partitioned by this pair;
/// a query that crosses scopes is a bug, not a feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: String,
    pub site_id: String,
}

impl Scope {
    pub fn new(tenant_id: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            site_id: site_id.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.site_id)
    }
}

/// Authorized outcome of a dialog turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    #[default]
    Normal,
    Conservative,
    Refuse,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyMode::Normal => "normal",
            PolicyMode::Conservative => "conservative",
            PolicyMode::Refuse => "refuse",
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "normal" => Ok(PolicyMode::Normal),
            "conservative" => Ok(PolicyMode::Conservative),
            "refuse" => Ok(PolicyMode::Refuse),
            other => Err(format!("unknown policy mode: {}", other)),
        }
    }
}

/// Per-call context threaded through every tool invocation.
///
/// Maps 1:1 onto the correlation headers of the tool RPC surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContext {
    pub tenant_id: String,
    pub site_id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npc_id: Option<String>,
}

impl ToolContext {
    pub fn new(scope: &Scope, trace_id: &TraceId) -> Self {
        Self {
            tenant_id: scope.tenant_id.clone(),
            site_id: scope.site_id.clone(),
            trace_id: trace_id.to_string(),
            span_id: None,
            user_id: None,
            session_id: None,
            npc_id: None,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.tenant_id.clone(), self.site_id.clone())
    }
}

/// A single citation attached to a grounded answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationItem {
    pub evidence_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    pub confidence: f64,
}

/// Role of a session-memory message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_has_prefix_and_length() {
        let id = TraceId::new();
        assert!(id.as_str().starts_with("trace-"));
        assert_eq!(id.as_str().len(), "trace-".len() + 16);
    }

    #[test]
    fn policy_mode_round_trips() {
        for mode in [PolicyMode::Normal, PolicyMode::Conservative, PolicyMode::Refuse] {
            assert_eq!(mode.as_str().parse::<PolicyMode>().unwrap(), mode);
        }
    }
}
