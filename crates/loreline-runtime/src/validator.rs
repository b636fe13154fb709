//! Output validation against NPC constraints.
//!
//! Runs after the gates: forbidden-topic scan (refuse), must-cite
//! enforcement for fact answers (downgrade), and the response-length cap
//! (trim). Pure computation.

use loreline_core::{CitationItem, PolicyMode};
use loreline_gate::IntentLabel;
use loreline_tools::NpcProfileView;

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub policy_mode: PolicyMode,
    pub text: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OutputValidator;

impl OutputValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        text: &str,
        citations: &[CitationItem],
        profile: &NpcProfileView,
        intent: IntentLabel,
    ) -> ValidationOutcome {
        // Forbidden topics refuse outright.
        for topic in profile.forbidden_topics() {
            if !topic.is_empty() && text.contains(&topic) {
                return ValidationOutcome {
                    policy_mode: PolicyMode::Refuse,
                    text: format!("抱歉，{}不便谈论这个话题。", profile.display()),
                    reason: Some(format!("forbidden_topic: {}", topic)),
                };
            }
        }

        // Must-cite applies to fact answers only; greetings and preference
        // turns legitimately carry no citations.
        if profile.must_cite_sources && intent == IntentLabel::FactSeeking && citations.is_empty() {
            return ValidationOutcome {
                policy_mode: PolicyMode::Conservative,
                text: text.to_string(),
                reason: Some("must_cite_without_citations".to_string()),
            };
        }

        // Length cap trims without changing the policy mode.
        if let Some(max) = profile.max_response_length {
            let max = max as usize;
            if text.chars().count() > max {
                let trimmed: String = text.chars().take(max).collect();
                return ValidationOutcome {
                    policy_mode: PolicyMode::Normal,
                    text: trimmed,
                    reason: Some("response_length_trimmed".to_string()),
                };
            }
        }

        ValidationOutcome {
            policy_mode: PolicyMode::Normal,
            text: text.to_string(),
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(forbidden: &[&str], must_cite: bool, max_len: Option<u32>) -> NpcProfileView {
        NpcProfileView {
            npc_id: "ancestor".to_string(),
            version: 1,
            active: true,
            name: "yan".to_string(),
            display_name: Some("老严".to_string()),
            npc_type: "ancestor".to_string(),
            persona: json!({"constraints": {"forbidden_topics": forbidden}}),
            knowledge_domains: vec![],
            greeting_templates: vec![],
            fallback_responses: vec![],
            max_response_length: max_len,
            must_cite_sources: must_cite,
        }
    }

    fn citation() -> CitationItem {
        CitationItem {
            evidence_id: "e1".to_string(),
            title: "严氏家训".to_string(),
            source_ref: None,
            excerpt: None,
            confidence: 0.9,
        }
    }

    #[test]
    fn forbidden_topic_refuses() {
        let v = OutputValidator::new();
        let outcome = v.validate(
            "关于政治，我认为……",
            &[citation()],
            &profile(&["政治"], false, None),
            IntentLabel::FactSeeking,
        );
        assert_eq!(outcome.policy_mode, PolicyMode::Refuse);
        assert!(outcome.text.contains("老严"));
    }

    #[test]
    fn must_cite_downgrades_uncited_fact_answers() {
        let v = OutputValidator::new();
        let outcome = v.validate(
            "先祖是明代迁来的。",
            &[],
            &profile(&[], true, None),
            IntentLabel::FactSeeking,
        );
        assert_eq!(outcome.policy_mode, PolicyMode::Conservative);

        // A greeting without citations stays normal.
        let outcome = v.validate("你好！", &[], &profile(&[], true, None), IntentLabel::Greeting);
        assert_eq!(outcome.policy_mode, PolicyMode::Normal);
    }

    #[test]
    fn length_cap_trims_without_downgrade() {
        let v = OutputValidator::new();
        let outcome = v.validate(
            &"字".repeat(600),
            &[citation()],
            &profile(&[], false, Some(500)),
            IntentLabel::FactSeeking,
        );
        assert_eq!(outcome.policy_mode, PolicyMode::Normal);
        assert_eq!(outcome.text.chars().count(), 500);
    }
}
