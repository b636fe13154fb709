//! Cache key construction.
//!
//! Keys follow `prefix:tenant:site:resource_type:resource_id` so a whole
//! site (or a single resource) can be invalidated with one pattern delete.

use loreline_core::Scope;
use sha2::{Digest, Sha256};

/// Resource types with a configured TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResource {
    NpcProfile,
    PromptActive,
    SiteMap,
    Evidence,
}

impl CacheResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheResource::NpcProfile => "npc_profile",
            CacheResource::PromptActive => "prompt_active",
            CacheResource::SiteMap => "site_map",
            CacheResource::Evidence => "evidence",
        }
    }

    /// TTL in seconds for this resource type.
    pub fn ttl_seconds(&self) -> u64 {
        match self {
            CacheResource::NpcProfile => 300,
            CacheResource::PromptActive => 300,
            CacheResource::SiteMap => 600,
            CacheResource::Evidence => 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    prefix: String,
}

impl CacheKeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn build(&self, scope: &Scope, resource: CacheResource, resource_id: &str) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.prefix,
            scope.tenant_id,
            scope.site_id,
            resource.as_str(),
            resource_id
        )
    }

    pub fn npc_profile(&self, scope: &Scope, npc_id: &str) -> String {
        self.build(scope, CacheResource::NpcProfile, npc_id)
    }

    pub fn prompt_active(&self, scope: &Scope, npc_id: &str) -> String {
        self.build(scope, CacheResource::PromptActive, npc_id)
    }

    pub fn site_map(&self, scope: &Scope) -> String {
        self.build(scope, CacheResource::SiteMap, &scope.site_id)
    }

    /// Evidence queries are keyed by a stable hash of the query text plus
    /// the optional domain filter, so semantically identical lookups share
    /// one entry.
    pub fn evidence(&self, scope: &Scope, query: &str, domains: Option<&[String]>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        if let Some(domains) = domains {
            let mut sorted: Vec<&str> = domains.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            for d in sorted {
                hasher.update(b"|");
                hasher.update(d.as_bytes());
            }
        }
        let digest = hex::encode(hasher.finalize());
        self.build(scope, CacheResource::Evidence, &digest[..16])
    }

    /// Pattern matching every key under one site.
    pub fn site_pattern(&self, scope: &Scope) -> String {
        format!("{}:{}:{}:*", self.prefix, scope.tenant_id, scope.site_id)
    }
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self::new("loreline")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped() {
        let b = CacheKeyBuilder::default();
        let scope = Scope::new("t1", "s1");
        assert_eq!(
            b.npc_profile(&scope, "ancestor"),
            "loreline:t1:s1:npc_profile:ancestor"
        );
        assert!(b.site_map(&scope).starts_with("loreline:t1:s1:site_map:"));
    }

    #[test]
    fn evidence_key_stable_under_domain_order() {
        let b = CacheKeyBuilder::default();
        let scope = Scope::new("t1", "s1");
        let d1 = vec!["family".to_string(), "architecture".to_string()];
        let d2 = vec!["architecture".to_string(), "family".to_string()];
        assert_eq!(
            b.evidence(&scope, "query", Some(&d1)),
            b.evidence(&scope, "query", Some(&d2))
        );
        assert_ne!(
            b.evidence(&scope, "query", Some(&d1)),
            b.evidence(&scope, "other", Some(&d1))
        );
    }
}
