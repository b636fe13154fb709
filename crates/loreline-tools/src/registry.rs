//! Tool registry: the catalog of callable tools with their schemas and
//! execution metadata. Serializable for the external `/tools/list` API.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub requires_evidence: bool,
    pub ai_callable: bool,
    pub timeout_seconds: f64,
    #[serde(default)]
    pub required_permissions: Vec<String>,
}

/// In-memory tool catalog.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ToolDefinition) {
        self.tools.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list(&self) -> Vec<&ToolDefinition> {
        let mut defs: Vec<&ToolDefinition> = self.tools.values().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The built-in catalog.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();

        registry.register(ToolDefinition {
            name: "get_npc_profile".to_string(),
            description: "Load an NPC persona (active version by default)".to_string(),
            category: "persona".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "npc_id": {"type": "string"},
                    "version": {"type": "integer"}
                },
                "required": ["npc_id"]
            }),
            output_schema: json!({"type": "object"}),
            requires_evidence: false,
            ai_callable: true,
            timeout_seconds: 0.3,
            required_permissions: vec![],
        });

        registry.register(ToolDefinition {
            name: "get_prompt_active".to_string(),
            description: "Load the active prompt for an NPC, deriving one from the persona when the registry has none".to_string(),
            category: "persona".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "npc_id": {"type": "string"},
                    "prompt_type": {"type": "string", "enum": ["system", "greeting", "fallback"]}
                },
                "required": ["npc_id"]
            }),
            output_schema: json!({"type": "object"}),
            requires_evidence: false,
            ai_callable: true,
            timeout_seconds: 0.2,
            required_permissions: vec![],
        });

        registry.register(ToolDefinition {
            name: "search_content".to_string(),
            description: "Substring search over site contents".to_string(),
            category: "content".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "content_type": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "limit": {"type": "integer", "default": 10}
                },
                "required": ["query"]
            }),
            output_schema: json!({"type": "object"}),
            requires_evidence: false,
            ai_callable: true,
            timeout_seconds: 0.5,
            required_permissions: vec![],
        });

        registry.register(ToolDefinition {
            name: "get_site_map".to_string(),
            description: "Site composition: points of interest and routes".to_string(),
            category: "content".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "include_pois": {"type": "boolean", "default": true},
                    "include_routes": {"type": "boolean", "default": false}
                }
            }),
            output_schema: json!({"type": "object"}),
            requires_evidence: false,
            ai_callable: true,
            timeout_seconds: 0.3,
            required_permissions: vec![],
        });

        registry.register(ToolDefinition {
            name: "create_draft_content".to_string(),
            description: "Create a content row in draft status".to_string(),
            category: "content".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content_type": {"type": "string"},
                    "title": {"type": "string"},
                    "body": {"type": "string"},
                    "summary": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "domains": {"type": "array", "items": {"type": "string"}},
                    "source": {"type": "string"}
                },
                "required": ["content_type", "title", "body"]
            }),
            output_schema: json!({"type": "object"}),
            requires_evidence: false,
            ai_callable: true,
            timeout_seconds: 1.0,
            required_permissions: vec!["content:write".to_string()],
        });

        registry.register(ToolDefinition {
            name: "log_user_event".to_string(),
            description: "Append an analytics event".to_string(),
            category: "analytics".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "event_type": {"type": "string"},
                    "event_data": {"type": "object"}
                },
                "required": ["event_type"]
            }),
            output_schema: json!({"type": "object"}),
            requires_evidence: false,
            ai_callable: true,
            timeout_seconds: 0.15,
            required_permissions: vec![],
        });

        registry.register(ToolDefinition {
            name: "retrieve_evidence".to_string(),
            description: "Retrieve citable evidence; degrades instead of failing".to_string(),
            category: "retrieval".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "strategy": {"type": "string", "enum": ["trgm", "qdrant", "hybrid", "like"]},
                    "limit": {"type": "integer", "default": 5},
                    "min_score": {"type": "number", "default": 0.3},
                    "domains": {"type": "array", "items": {"type": "string"}},
                    "use_trgm": {"type": "boolean", "default": true}
                },
                "required": ["query"]
            }),
            output_schema: json!({"type": "object"}),
            requires_evidence: true,
            ai_callable: true,
            timeout_seconds: 0.8,
            required_permissions: vec![],
        });

        registry.register(ToolDefinition {
            name: "submit_feedback".to_string(),
            description: "Persist a pending feedback item".to_string(),
            category: "feedback".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "trace_id": {"type": "string"},
                    "feedback_type": {"type": "string"},
                    "severity": {"type": "string"},
                    "content": {"type": "string"},
                    "original_response": {"type": "string"},
                    "suggested_fix": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["feedback_type", "severity", "content"]
            }),
            output_schema: json!({"type": "object"}),
            requires_evidence: false,
            ai_callable: true,
            timeout_seconds: 0.5,
            required_permissions: vec![],
        });

        registry.register(ToolDefinition {
            name: "list_feedback".to_string(),
            description: "Paged feedback listing with status/type/severity filters".to_string(),
            category: "feedback".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string"},
                    "feedback_type": {"type": "string"},
                    "severity": {"type": "string"},
                    "limit": {"type": "integer", "default": 20}
                }
            }),
            output_schema: json!({"type": "object"}),
            requires_evidence: false,
            ai_callable: false,
            timeout_seconds: 0.5,
            required_permissions: vec!["feedback:read".to_string()],
        });

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_complete() {
        let registry = ToolRegistry::with_builtin_tools();
        for name in [
            "get_npc_profile",
            "get_prompt_active",
            "search_content",
            "get_site_map",
            "create_draft_content",
            "log_user_event",
            "retrieve_evidence",
            "submit_feedback",
            "list_feedback",
        ] {
            assert!(registry.contains(name), "missing tool: {name}");
        }
        assert_eq!(registry.len(), 9);
    }

    #[test]
    fn list_is_sorted_and_serializable() {
        let registry = ToolRegistry::with_builtin_tools();
        let listed = registry.list();
        let names: Vec<&str> = listed.iter().map(|d| d.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(serde_json::to_string(&listed).is_ok());
    }
}
