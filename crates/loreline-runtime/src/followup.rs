//! Follow-up question suggestions: a light heuristic over the persona's
//! knowledge domains and the top retrieval hit. Zero to three items.

use loreline_evidence::RetrievalHit;
use loreline_tools::NpcProfileView;

pub fn generate(profile: &NpcProfileView, hits: &[RetrievalHit]) -> Vec<String> {
    let mut questions = Vec::new();
    for domain in profile.knowledge_domains.iter().take(2) {
        questions.push(format!("能给我讲讲{}吗？", domain));
    }
    if let Some(hit) = hits.first() {
        if !hit.title.is_empty() {
            questions.push(format!("关于{}，还有什么有趣的故事吗？", hit.title));
        }
    }
    questions.truncate(3);
    questions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn caps_at_three_and_uses_domains_then_evidence() {
        let profile = NpcProfileView {
            npc_id: "a".to_string(),
            version: 1,
            active: true,
            name: "a".to_string(),
            display_name: None,
            npc_type: "guide".to_string(),
            persona: json!({}),
            knowledge_domains: vec![
                "家训".to_string(),
                "建筑".to_string(),
                "民俗".to_string(),
            ],
            greeting_templates: vec![],
            fallback_responses: vec![],
            max_response_length: None,
            must_cite_sources: false,
        };
        let hits = vec![RetrievalHit {
            id: "e1".to_string(),
            source_type: "archive".to_string(),
            source_ref: None,
            title: "严氏家训".to_string(),
            excerpt: String::new(),
            confidence: 0.9,
            verified: true,
            tags: vec![],
            retrieval_score: None,
            trgm_score: None,
            qdrant_score: None,
        }];
        let questions = generate(&profile, &hits);
        assert_eq!(questions.len(), 3);
        assert!(questions[0].contains("家训"));
        assert!(questions[2].contains("严氏家训"));
    }
}
