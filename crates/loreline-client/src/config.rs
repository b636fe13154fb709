use std::time::Duration;

use loreline_cache::CacheResource;

/// How the dialog runtime reacts when a tool ultimately fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPriority {
    /// Abort the turn with an error response.
    Critical,
    /// Degrade to the conservative path.
    Important,
    /// Skip and continue.
    Optional,
}

/// Per-tool call policy.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub priority: ToolPriority,
    pub cacheable: bool,
    pub cache_ttl: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            max_retries: 1,
            retry_delay: Duration::from_millis(100),
            priority: ToolPriority::Important,
            cacheable: false,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Effective per-tool configuration. Unknown tools get the default.
pub fn tool_config(tool_name: &str) -> ToolConfig {
    match tool_name {
        "get_prompt_active" => ToolConfig {
            timeout: Duration::from_millis(200),
            max_retries: 2,
            priority: ToolPriority::Critical,
            cacheable: true,
            cache_ttl: Duration::from_secs(CacheResource::PromptActive.ttl_seconds()),
            ..ToolConfig::default()
        },
        "get_npc_profile" => ToolConfig {
            timeout: Duration::from_millis(300),
            max_retries: 2,
            priority: ToolPriority::Critical,
            cacheable: true,
            cache_ttl: Duration::from_secs(CacheResource::NpcProfile.ttl_seconds()),
            ..ToolConfig::default()
        },
        "get_site_map" => ToolConfig {
            timeout: Duration::from_millis(300),
            max_retries: 1,
            priority: ToolPriority::Optional,
            cacheable: true,
            cache_ttl: Duration::from_secs(CacheResource::SiteMap.ttl_seconds()),
            ..ToolConfig::default()
        },
        "retrieve_evidence" => ToolConfig {
            timeout: Duration::from_millis(800),
            max_retries: 1,
            priority: ToolPriority::Important,
            cacheable: true,
            cache_ttl: Duration::from_secs(CacheResource::Evidence.ttl_seconds()),
            ..ToolConfig::default()
        },
        "search_content" => ToolConfig {
            timeout: Duration::from_millis(500),
            max_retries: 1,
            priority: ToolPriority::Important,
            ..ToolConfig::default()
        },
        // Fire-and-forget: one shot, never blocks the turn.
        "log_user_event" => ToolConfig {
            timeout: Duration::from_millis(150),
            max_retries: 0,
            priority: ToolPriority::Optional,
            ..ToolConfig::default()
        },
        "create_trace" => ToolConfig {
            timeout: Duration::from_millis(300),
            max_retries: 1,
            priority: ToolPriority::Important,
            ..ToolConfig::default()
        },
        // Side-effecting tools are never retried: at most one external
        // action per trace.
        "create_draft_content" | "submit_feedback" => ToolConfig {
            timeout: Duration::from_millis(1000),
            max_retries: 0,
            priority: ToolPriority::Important,
            ..ToolConfig::default()
        },
        _ => ToolConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_contract() {
        let prompt = tool_config("get_prompt_active");
        assert_eq!(prompt.timeout, Duration::from_millis(200));
        assert_eq!(prompt.max_retries, 2);
        assert!(prompt.cacheable);
        assert_eq!(prompt.priority, ToolPriority::Critical);

        let evidence = tool_config("retrieve_evidence");
        assert_eq!(evidence.timeout, Duration::from_millis(800));
        assert_eq!(evidence.cache_ttl, Duration::from_secs(60));

        let event = tool_config("log_user_event");
        assert_eq!(event.max_retries, 0);
        assert_eq!(event.priority, ToolPriority::Optional);

        let unknown = tool_config("mystery_tool");
        assert_eq!(unknown.timeout, Duration::from_millis(500));
        assert_eq!(unknown.max_retries, 1);
        assert!(!unknown.cacheable);
    }
}
