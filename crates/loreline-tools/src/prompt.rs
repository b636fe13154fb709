//! Prompt derivation from a persona.
//!
//! Used when the prompt registry has no active row for an NPC: the system,
//! greeting, and fallback prompts are built from the persona fields.

use crate::schemas::NpcProfileView;

/// Build a system prompt from the persona's identity, personality, and
/// constraint blocks.
pub fn build_system_prompt(profile: &NpcProfileView) -> String {
    let persona = &profile.persona;
    let identity = persona.get("identity");
    let personality = persona.get("personality");
    let constraints = persona.get("constraints");

    let field = |obj: Option<&serde_json::Value>, key: &str| -> Option<String> {
        obj.and_then(|o| o.get(key))
            .and_then(|v| v.as_str())
            .map(String::from)
    };
    let list = |obj: Option<&serde_json::Value>, key: &str| -> Vec<String> {
        obj.and_then(|o| o.get(key))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut parts = vec![format!("你是{}。", profile.display())];
    if let Some(era) = field(identity, "era") {
        parts.push(format!("你生活在{}。", era));
    }
    if let Some(role) = field(identity, "role") {
        parts.push(format!("你的身份是{}。", role));
    }
    if let Some(background) = field(identity, "background") {
        parts.push(format!("背景：{}", background));
    }
    let traits = list(personality, "traits");
    if !traits.is_empty() {
        parts.push(format!("你的性格特点：{}。", traits.join("、")));
    }
    if let Some(style) = field(personality, "speaking_style") {
        parts.push(format!("说话风格：{}", style));
    }
    if !profile.knowledge_domains.is_empty() {
        parts.push(format!("你擅长的领域：{}。", profile.knowledge_domains.join("、")));
    }
    let forbidden = list(constraints, "forbidden_topics");
    if !forbidden.is_empty() {
        parts.push(format!("禁止讨论的话题：{}。", forbidden.join("、")));
    }
    if profile.must_cite_sources {
        parts.push("回答时请引用可靠来源。".to_string());
    }
    if let Some(max) = profile.max_response_length {
        parts.push(format!("回答长度控制在{}字以内。", max));
    }
    parts.join("\n")
}

pub fn greeting_prompt(profile: &NpcProfileView) -> String {
    profile
        .greeting_templates
        .first()
        .cloned()
        .unwrap_or_else(|| format!("你好，我是{}。", profile.display()))
}

pub fn fallback_prompt(profile: &NpcProfileView) -> String {
    profile
        .fallback_responses
        .first()
        .cloned()
        .unwrap_or_else(|| "抱歉，这个问题我不太清楚。".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> NpcProfileView {
        NpcProfileView {
            npc_id: "ancestor".to_string(),
            version: 1,
            active: true,
            name: "yan".to_string(),
            display_name: Some("老严".to_string()),
            npc_type: "ancestor".to_string(),
            persona: json!({
                "identity": {"era": "明清时期", "role": "族长"},
                "personality": {"traits": ["慈祥", "严谨"], "speaking_style": "文雅"},
                "constraints": {"forbidden_topics": ["政治"]}
            }),
            knowledge_domains: vec!["家训".to_string()],
            greeting_templates: vec![],
            fallback_responses: vec![],
            max_response_length: Some(500),
            must_cite_sources: true,
        }
    }

    #[test]
    fn system_prompt_covers_persona_blocks() {
        let prompt = build_system_prompt(&profile());
        assert!(prompt.contains("你是老严"));
        assert!(prompt.contains("明清时期"));
        assert!(prompt.contains("慈祥、严谨"));
        assert!(prompt.contains("禁止讨论的话题：政治"));
        assert!(prompt.contains("引用可靠来源"));
        assert!(prompt.contains("500字以内"));
    }

    #[test]
    fn greeting_falls_back_to_display_name() {
        assert!(greeting_prompt(&profile()).contains("老严"));
    }
}
