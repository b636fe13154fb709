//! The two-phase evidence gate.
//!
//! Pre-LLM: fact-seeking queries need enough citations or the turn is
//! forced conservative before any generation happens. Post-LLM: responses
//! to context/preference queries are scanned for ungrounded factual
//! assertions, which are filtered into blurred phrasing.

use std::sync::Arc;

use loreline_core::{CitationItem, PolicyMode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::intent::{IntentClassifier, IntentContext, IntentLabel, RuleIntentClassifier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub policy_mode: PolicyMode,
    pub intent: IntentLabel,
    pub intent_confidence: f64,
    pub reason: String,
    pub citations_count: usize,
    pub forbidden_assertions: Vec<String>,
    pub requires_filtering: bool,
    pub classifier_type: String,
    pub cached: bool,
}

pub struct EvidenceGate {
    min_citations: usize,
    classifier: Arc<dyn IntentClassifier>,
    rules: RuleIntentClassifier,
    filters: Vec<(Regex, &'static str)>,
}

impl EvidenceGate {
    pub fn new(min_citations: usize, classifier: Arc<dyn IntentClassifier>) -> Self {
        Self {
            min_citations,
            classifier,
            rules: RuleIntentClassifier::new(),
            filters: build_filters(),
        }
    }

    pub fn with_rule_classifier(min_citations: usize) -> Self {
        Self::new(min_citations, Arc::new(RuleIntentClassifier::new()))
    }

    pub fn min_citations(&self) -> usize {
        self.min_citations
    }

    /// Decide whether generation may proceed and under which policy mode.
    pub async fn check_before_llm(
        &self,
        query: &str,
        citations: &[CitationItem],
        context: Option<&IntentContext>,
    ) -> GateResult {
        let intent = self.classifier.classify(query, context).await;
        info!(
            intent = intent.label.as_str(),
            confidence = intent.confidence,
            classifier = %intent.classifier_type,
            cached = intent.cached,
            "intent classified"
        );

        let citations_count = citations.len();
        let base = GateResult {
            passed: true,
            policy_mode: PolicyMode::Normal,
            intent: intent.label,
            intent_confidence: intent.confidence,
            reason: String::new(),
            citations_count,
            forbidden_assertions: Vec::new(),
            requires_filtering: false,
            classifier_type: intent.classifier_type.clone(),
            cached: intent.cached,
        };

        match intent.label {
            IntentLabel::FactSeeking => {
                if citations_count >= self.min_citations {
                    GateResult {
                        reason: "事实性问题，有足够证据支撑".to_string(),
                        ..base
                    }
                } else {
                    GateResult {
                        passed: false,
                        policy_mode: PolicyMode::Conservative,
                        reason: format!(
                            "事实性问题，证据不足（需要 {}，实际 {}）",
                            self.min_citations, citations_count
                        ),
                        ..base
                    }
                }
            }
            IntentLabel::Greeting => GateResult {
                reason: "问候语，无需证据".to_string(),
                ..base
            },
            IntentLabel::OutOfScope => GateResult {
                passed: false,
                policy_mode: PolicyMode::Conservative,
                reason: "问题超出知识范围".to_string(),
                ..base
            },
            IntentLabel::ContextPreference | IntentLabel::ClarifyingFollowUp => GateResult {
                requires_filtering: true,
                reason: "上下文偏好问题，允许使用会话记忆".to_string(),
                ..base
            },
        }
    }

    /// Scan a generated response for ungrounded factual assertions.
    ///
    /// Only `context_preference` turns are downgraded here: they may use
    /// session memory, so an uncited year, generation, or reign name in
    /// their output is exactly the leak this check exists for.
    pub fn check_after_llm(
        &self,
        query: &str,
        response_text: &str,
        citations: &[CitationItem],
        intent: IntentLabel,
    ) -> GateResult {
        let citations_count = citations.len();
        let forbidden = self.rules.contains_forbidden_assertions(response_text);

        if intent == IntentLabel::ContextPreference && !forbidden.is_empty() && citations_count == 0
        {
            warn!(
                query = %query.chars().take(50).collect::<String>(),
                assertions = ?forbidden.iter().take(5).collect::<Vec<_>>(),
                "forbidden assertions detected in ungrounded response"
            );
            return GateResult {
                passed: false,
                policy_mode: PolicyMode::Conservative,
                intent,
                intent_confidence: 1.0,
                reason: format!("检测到 {} 个无证据的史实断言", forbidden.len()),
                citations_count,
                forbidden_assertions: forbidden.into_iter().take(5).collect(),
                requires_filtering: true,
                classifier_type: "rule".to_string(),
                cached: false,
            };
        }

        GateResult {
            passed: true,
            policy_mode: PolicyMode::Normal,
            intent,
            intent_confidence: 1.0,
            reason: "输出检查通过".to_string(),
            citations_count,
            forbidden_assertions: Vec::new(),
            requires_filtering: false,
            classifier_type: "rule".to_string(),
            cached: false,
        }
    }

    /// NPC-aware conservative text for a blocked turn.
    pub fn conservative_response(&self, intent: IntentLabel, npc_name: &str) -> String {
        match intent {
            IntentLabel::FactSeeking => format!(
                "这个问题涉及具体的历史事实，{}需要查阅族谱或文献才能准确回答。建议您询问村中管理族谱的长辈，或查阅相关史料记载。",
                npc_name
            ),
            IntentLabel::OutOfScope => format!(
                "这个问题超出了{}的知识范围。如果您想了解本地的历史文化，{}很乐意为您介绍。",
                npc_name, npc_name
            ),
            _ => format!(
                "关于这个问题，{}不太确定具体细节。如果您想了解准确的历史信息，建议查阅相关文献记载。",
                npc_name
            ),
        }
    }

    /// Replace ungrounded year, generation, and reign-name assertions with
    /// blurred phrasing.
    pub fn filter_forbidden_assertions(&self, text: &str) -> String {
        let mut filtered = text.to_string();
        for (pattern, replacement) in &self.filters {
            filtered = pattern.replace_all(&filtered, *replacement).into_owned();
        }
        filtered
    }
}

/// Replacement order matters: reign names go first so their year suffixes
/// are consumed with them, then explicit year forms, then bare years.
fn build_filters() -> Vec<(Regex, &'static str)> {
    vec![
        (
            Regex::new(r"(?:清朝)?(康熙|雍正|乾隆|嘉庆|道光|咸丰|同治|光绪|宣统)\d*年?间?")
                .expect("filter pattern"),
            "清朝某个时期",
        ),
        (
            Regex::new(r"(?:明朝)?(洪武|永乐|正统|成化|弘治|正德|嘉靖|隆庆|万历|崇祯)\d*年?间?")
                .expect("filter pattern"),
            "明朝某个时期",
        ),
        (Regex::new(r"公元\d+年").expect("filter pattern"), "很久以前"),
        (Regex::new(r"距今\d+年").expect("filter pattern"), "很多年前"),
        (Regex::new(r"\d{3,4}年").expect("filter pattern"), "多年前"),
        (Regex::new(r"第\d+代").expect("filter pattern"), "某一代"),
        (Regex::new(r"第\d+世").expect("filter pattern"), "某一世"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation() -> CitationItem {
        CitationItem {
            evidence_id: "e1".to_string(),
            title: "严氏家训".to_string(),
            source_ref: None,
            excerpt: Some("一曰孝悌为本".to_string()),
            confidence: 0.9,
        }
    }

    fn gate() -> EvidenceGate {
        EvidenceGate::with_rule_classifier(1)
    }

    #[tokio::test]
    async fn fact_seeking_passes_at_exact_threshold() {
        let gate = gate();
        let result = gate
            .check_before_llm("严氏家训有哪些？", &[citation()], None)
            .await;
        assert!(result.passed);
        assert_eq!(result.policy_mode, PolicyMode::Normal);
        assert_eq!(result.citations_count, 1);
    }

    #[tokio::test]
    async fn fact_seeking_blocks_below_threshold() {
        let gate = gate();
        let result = gate
            .check_before_llm("严氏先祖在哪一年迁来的？", &[], None)
            .await;
        assert!(!result.passed);
        assert_eq!(result.policy_mode, PolicyMode::Conservative);
        assert_eq!(result.intent, IntentLabel::FactSeeking);
        assert!(result.reason.contains("证据不足"));
    }

    #[tokio::test]
    async fn greeting_passes_without_evidence() {
        let gate = gate();
        let result = gate.check_before_llm("你好！", &[], None).await;
        assert!(result.passed);
        assert!(!result.requires_filtering);
    }

    #[tokio::test]
    async fn preference_intent_requires_filtering() {
        let gate = gate();
        let result = gate
            .check_before_llm("我之前喜欢听建筑故事，再讲一个。", &[], None)
            .await;
        assert!(result.passed);
        assert!(result.requires_filtering);
        assert_eq!(result.intent, IntentLabel::ContextPreference);
    }

    #[test]
    fn post_gate_blocks_ungrounded_assertions() {
        let gate = gate();
        let result = gate.check_after_llm(
            "再讲讲这座桥",
            "这座桥清朝乾隆年间修建于公元1773年。",
            &[],
            IntentLabel::ContextPreference,
        );
        assert!(!result.passed);
        assert_eq!(result.policy_mode, PolicyMode::Conservative);
        assert!(!result.forbidden_assertions.is_empty());
    }

    #[test]
    fn post_gate_allows_grounded_assertions() {
        let gate = gate();
        let result = gate.check_after_llm(
            "这座桥是什么时候建的？",
            "这座桥修建于公元1773年。",
            &[citation()],
            IntentLabel::ContextPreference,
        );
        assert!(result.passed);
    }

    #[test]
    fn post_gate_leaves_follow_up_turns_alone() {
        let gate = gate();
        let result = gate.check_after_llm(
            "然后呢",
            "这座桥清朝乾隆年间修建于公元1773年。",
            &[],
            IntentLabel::ClarifyingFollowUp,
        );
        assert!(result.passed);
        assert_eq!(result.policy_mode, PolicyMode::Normal);
    }

    #[test]
    fn filter_blurs_years_and_reigns() {
        let gate = gate();
        let filtered =
            gate.filter_forbidden_assertions("清朝乾隆年间修建于公元1773年，传至第12代。");
        assert!(filtered.contains("清朝某个时期"));
        assert!(filtered.contains("很久以前"));
        assert!(filtered.contains("某一代"));
        assert!(!filtered.contains("1773"));
        assert!(!filtered.contains("乾隆"));
    }

    #[test]
    fn conservative_text_is_npc_aware() {
        let gate = gate();
        let text = gate.conservative_response(IntentLabel::FactSeeking, "老严");
        assert!(text.contains("老严"));
    }
}
