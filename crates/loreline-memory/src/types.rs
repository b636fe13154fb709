use chrono::Utc;
use loreline_core::MessageRole;
use serde::{Deserialize, Serialize};

/// One short-memory message. Short memory is NPC-isolated: the storage key
/// includes the npc_id, so two NPCs in one session never see each other's
/// history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, trace_id: Option<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
            trace_id,
        }
    }
}

/// Cross-NPC preference record.
///
/// Carries user choices only: verbosity, tone, interest tags. Factual
/// claims never belong here; facts come from the evidence corpus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(default)]
    pub interest_tags: Vec<String>,
}

impl Preference {
    pub fn is_empty(&self) -> bool {
        self.verbosity.is_none() && self.tone.is_none() && self.interest_tags.is_empty()
    }

    /// Render for prompt injection, or `None` when nothing is recorded.
    pub fn to_prompt_format(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut lines = vec!["【用户偏好 - 仅用于调整表达方式，不作为事实依据】".to_string()];
        if let Some(v) = &self.verbosity {
            lines.push(format!("回答详略：{}", v));
        }
        if let Some(t) = &self.tone {
            lines.push(format!("语气偏好：{}", t));
        }
        if !self.interest_tags.is_empty() {
            lines.push(format!("兴趣话题：{}", self.interest_tags.join("、")));
        }
        Some(lines.join("\n"))
    }
}

/// Summary of one session, used by trace replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npc_id: Option<String>,
    pub message_count: usize,
    pub recent_messages: Vec<SummaryMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryMessage {
    pub role: String,
    pub content: String,
    pub timestamp: String,
}
