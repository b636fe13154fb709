//! Query intent classification.
//!
//! The rule classifier is pure computation over keyword patterns and is
//! always available. The LLM classifier is an optional wrapper with a
//! response cache; any failure falls back to the rules.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loreline_cache::Cache;
use loreline_provider::{LlmProvider, LlmRequest};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    FactSeeking,
    ContextPreference,
    ClarifyingFollowUp,
    Greeting,
    OutOfScope,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::FactSeeking => "fact_seeking",
            IntentLabel::ContextPreference => "context_preference",
            IntentLabel::ClarifyingFollowUp => "clarifying_follow_up",
            IntentLabel::Greeting => "greeting",
            IntentLabel::OutOfScope => "out_of_scope",
        }
    }

    fn from_text(text: &str) -> Option<Self> {
        for label in [
            IntentLabel::FactSeeking,
            IntentLabel::ContextPreference,
            IntentLabel::ClarifyingFollowUp,
            IntentLabel::Greeting,
            IntentLabel::OutOfScope,
        ] {
            if text.contains(label.as_str()) {
                return Some(label);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub label: IntentLabel,
    pub confidence: f64,
    pub classifier_type: String,
    pub cached: bool,
}

/// Optional context for classification (recent conversation, NPC domains).
#[derive(Debug, Clone, Default)]
pub struct IntentContext {
    pub recent_summary: Option<String>,
    pub knowledge_domains: Vec<String>,
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, query: &str, context: Option<&IntentContext>) -> IntentResult;
}

/// Keyword/pattern classifier. Pure computation, no suspension points.
pub struct RuleIntentClassifier {
    greeting: Regex,
    out_of_scope: Regex,
    context_preference: Regex,
    clarifying: Regex,
    fact_seeking: Regex,
    forbidden: Vec<Regex>,
}

impl RuleIntentClassifier {
    pub fn new() -> Self {
        Self {
            greeting: Regex::new(
                r"^(你好|您好|早上好|下午好|晚上好|嗨|在吗|你是谁|您是哪位|hi|hello|hey)",
            )
            .expect("greeting pattern"),
            out_of_scope: Regex::new(
                r"股票|基金|彩票|天气|游戏|编程|代码|手机|电脑|明星|电影|电视剧|网购",
            )
            .expect("out_of_scope pattern"),
            context_preference: Regex::new(
                r"之前|刚才|上次|继续|再讲|再说|再来|还想听|喜欢听|喜欢|接着讲|换个",
            )
            .expect("context_preference pattern"),
            clarifying: Regex::new(r"还有吗|然后呢|后来呢|具体说说|详细说说|什么意思|为什么这么说")
                .expect("clarifying pattern"),
            fact_seeking: Regex::new(concat!(
                "哪一年|哪年|何年|何时|什么时候|多少年|几几年|第几代|第几世|哪一代|哪些|",
                "是谁|何人|谁建|谁写|起源|来历|历史|族谱|家训|典故|公元|朝代|年间|何处|在哪|多少"
            ))
            .expect("fact_seeking pattern"),
            forbidden: vec![
                Regex::new(r"公元\d+年").expect("forbidden pattern"),
                Regex::new(r"距今\d+年").expect("forbidden pattern"),
                Regex::new(r"\d{3,4}年").expect("forbidden pattern"),
                Regex::new(r"第\d+代").expect("forbidden pattern"),
                Regex::new(r"第\d+世").expect("forbidden pattern"),
                Regex::new(r"(康熙|雍正|乾隆|嘉庆|道光|咸丰|同治|光绪|宣统)\d*年?间?")
                    .expect("forbidden pattern"),
                Regex::new(r"(洪武|永乐|正统|成化|弘治|正德|嘉靖|隆庆|万历|崇祯)\d*年?间?")
                    .expect("forbidden pattern"),
            ],
        }
    }

    pub fn classify_sync(&self, query: &str) -> IntentResult {
        let trimmed = query.trim();
        let (label, confidence) = if self.greeting.is_match(trimmed) {
            (IntentLabel::Greeting, 0.95)
        } else if self.out_of_scope.is_match(trimmed) {
            (IntentLabel::OutOfScope, 0.9)
        } else if self.context_preference.is_match(trimmed) {
            (IntentLabel::ContextPreference, 0.85)
        } else if self.clarifying.is_match(trimmed) {
            (IntentLabel::ClarifyingFollowUp, 0.8)
        } else if self.fact_seeking.is_match(trimmed) {
            (IntentLabel::FactSeeking, 0.9)
        } else {
            // Unrecognised queries are treated as fact-seeking: evidence
            // first is the safe default.
            (IntentLabel::FactSeeking, 0.5)
        };
        IntentResult {
            label,
            confidence,
            classifier_type: "rule".to_string(),
            cached: false,
        }
    }

    /// Factual assertions that must not appear ungrounded: year numbers,
    /// generational markers, and reign names.
    pub fn contains_forbidden_assertions(&self, text: &str) -> Vec<String> {
        let mut found = Vec::new();
        for pattern in &self.forbidden {
            for m in pattern.find_iter(text) {
                let s = m.as_str().to_string();
                if !found.contains(&s) {
                    found.push(s);
                }
            }
        }
        found
    }
}

impl Default for RuleIntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentClassifier for RuleIntentClassifier {
    async fn classify(&self, query: &str, _context: Option<&IntentContext>) -> IntentResult {
        self.classify_sync(query)
    }
}

/// LLM-backed classifier with a cache and a guaranteed rule fallback.
pub struct LlmIntentClassifier {
    provider: Arc<dyn LlmProvider>,
    cache: Arc<Cache>,
    cache_ttl: Duration,
    fallback: RuleIntentClassifier,
}

impl LlmIntentClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, cache: Arc<Cache>, cache_ttl: Duration) -> Self {
        Self {
            provider,
            cache,
            cache_ttl,
            fallback: RuleIntentClassifier::new(),
        }
    }

    fn cache_key(query: &str) -> String {
        let digest = Sha256::digest(query.as_bytes());
        format!("loreline:intent:{}", &hex::encode(digest)[..16])
    }

    fn classification_prompt(context: Option<&IntentContext>) -> String {
        let mut prompt = String::from(
            "你是查询意图分类器。将用户输入归入且仅归入以下标签之一：\
fact_seeking（询问具体史实）、context_preference（基于对话偏好的请求）、\
clarifying_follow_up（追问澄清）、greeting（问候）、out_of_scope（超出范围）。\
只输出标签本身。",
        );
        if let Some(ctx) = context {
            if let Some(summary) = &ctx.recent_summary {
                prompt.push_str("\n近期对话：");
                prompt.push_str(summary);
            }
        }
        prompt
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, query: &str, context: Option<&IntentContext>) -> IntentResult {
        let key = Self::cache_key(query);
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(mut result) = serde_json::from_value::<IntentResult>(cached) {
                result.cached = true;
                return result;
            }
        }

        let request = LlmRequest {
            system_prompt: Self::classification_prompt(context),
            user_message: query.to_string(),
            context: serde_json::Map::new(),
            citations: Vec::new(),
            max_tokens: 16,
            temperature: 0.0,
            trace_id: String::new(),
            npc_id: None,
        };

        match self.provider.generate(&request).await {
            Ok(response) => match IntentLabel::from_text(&response.text) {
                Some(label) => {
                    let result = IntentResult {
                        label,
                        confidence: 0.9,
                        classifier_type: "llm".to_string(),
                        cached: false,
                    };
                    if let Ok(value) = serde_json::to_value(&result) {
                        self.cache.set(&key, value, self.cache_ttl).await;
                    }
                    debug!(label = label.as_str(), "llm intent classified");
                    result
                }
                None => {
                    warn!(text = %response.text, "unparseable intent label, using rules");
                    self.fallback.classify_sync(query)
                }
            },
            Err(e) => {
                warn!(error = %e, "llm intent classification failed, using rules");
                self.fallback.classify_sync(query)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_the_five_labels() {
        let c = RuleIntentClassifier::new();
        assert_eq!(c.classify_sync("你好呀").label, IntentLabel::Greeting);
        assert_eq!(
            c.classify_sync("今天股票怎么样").label,
            IntentLabel::OutOfScope
        );
        assert_eq!(
            c.classify_sync("我之前喜欢听建筑故事，再讲一个。").label,
            IntentLabel::ContextPreference
        );
        assert_eq!(c.classify_sync("然后呢").label, IntentLabel::ClarifyingFollowUp);
        assert_eq!(
            c.classify_sync("严氏先祖在哪一年迁来的？").label,
            IntentLabel::FactSeeking
        );
        assert_eq!(
            c.classify_sync("严氏家训有哪些？").label,
            IntentLabel::FactSeeking
        );
    }

    #[test]
    fn unmatched_queries_default_to_fact_seeking() {
        let c = RuleIntentClassifier::new();
        let result = c.classify_sync("呃");
        assert_eq!(result.label, IntentLabel::FactSeeking);
        assert!(result.confidence < 0.6);
    }

    #[test]
    fn forbidden_assertions_cover_years_generations_reigns() {
        let c = RuleIntentClassifier::new();
        let found =
            c.contains_forbidden_assertions("清朝乾隆年间修建于公元1773年，传至第12代。");
        assert!(found.iter().any(|s| s.contains("乾隆")));
        assert!(found.iter().any(|s| s.contains("公元1773年")));
        assert!(found.iter().any(|s| s.contains("第12代")));
        assert!(c.contains_forbidden_assertions("老宅的木雕很精美。").is_empty());
    }
}
