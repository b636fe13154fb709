//! Schema-validated tool dispatch with per-call audit.
//!
//! Every call resolves its definition, validates input by typed
//! deserialization, dispatches to a handler, and persists a `tool_call`
//! trace row, success or failure.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use loreline_core::{Scope, ToolContext};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use loreline_evidence::{RetrievalRequest, Retriever};
use loreline_ledger::{ToolCallEntry, TraceRecord, TraceStore};

use crate::error::{Result, ToolError};
use crate::prompt;
use crate::registry::ToolRegistry;
use crate::schemas::*;
use crate::site_store::SiteStore;

/// `sha256(json_sorted(input))[:16]`: the audit fingerprint of a payload.
pub fn payload_hash(input: &Value) -> String {
    let canonical = canonical_json(input);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// JSON serialization with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    site_store: Arc<SiteStore>,
    retriever: Arc<Retriever>,
    ledger: Arc<TraceStore>,
}

impl ToolExecutor {
    pub fn new(
        registry: ToolRegistry,
        site_store: Arc<SiteStore>,
        retriever: Arc<Retriever>,
        ledger: Arc<TraceStore>,
    ) -> Self {
        Self {
            registry,
            site_store,
            retriever,
            ledger,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn site_store(&self) -> &Arc<SiteStore> {
        &self.site_store
    }

    /// Execute one tool call. Tool-level failures come back as
    /// `success = false`, never as an `Err`.
    pub async fn execute(&self, request: &ToolCallRequest) -> ToolCallResponse {
        let start = Instant::now();
        let ctx = &request.context;
        let hash = payload_hash(&request.input);

        info!(
            trace_id = %ctx.trace_id,
            tool_name = %request.tool_name,
            tenant_id = %ctx.tenant_id,
            site_id = %ctx.site_id,
            "tool call start"
        );

        let result = self.dispatch(&request.tool_name, &request.input, ctx).await;
        let latency_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok(output) => {
                let audit = ToolAudit {
                    trace_id: ctx.trace_id.clone(),
                    tool_name: request.tool_name.clone(),
                    status: "success".to_string(),
                    latency_ms,
                    request_payload_hash: hash,
                    error_type: None,
                    error_message: None,
                };
                self.record_trace(ctx, &request.tool_name, &audit, Some(&output), None);
                info!(trace_id = %ctx.trace_id, tool_name = %request.tool_name, latency_ms, "tool call success");
                ToolCallResponse {
                    success: true,
                    output: Some(output),
                    error: None,
                    error_type: None,
                    audit,
                }
            }
            Err(e) => {
                let audit = ToolAudit {
                    trace_id: ctx.trace_id.clone(),
                    tool_name: request.tool_name.clone(),
                    status: "error".to_string(),
                    latency_ms,
                    request_payload_hash: hash,
                    error_type: Some(e.error_type().to_string()),
                    error_message: Some(e.to_string()),
                };
                self.record_trace(ctx, &request.tool_name, &audit, None, Some(&e));
                error!(
                    trace_id = %ctx.trace_id,
                    tool_name = %request.tool_name,
                    error_type = e.error_type(),
                    error = %e,
                    "tool call error"
                );
                ToolCallResponse {
                    success: false,
                    output: None,
                    error: Some(e.to_string()),
                    error_type: Some(e.error_type().to_string()),
                    audit,
                }
            }
        }
    }

    async fn dispatch(&self, tool_name: &str, input: &Value, ctx: &ToolContext) -> Result<Value> {
        if !self.registry.contains(tool_name) {
            return Err(ToolError::ToolNotFound(tool_name.to_string()));
        }
        let scope = ctx.scope();

        match tool_name {
            "get_npc_profile" => {
                let input: GetNpcProfileInput = parse_input(input)?;
                let profile = self
                    .site_store
                    .get_npc_profile(&scope, &input.npc_id, input.version)?
                    .ok_or_else(|| ToolError::NotFound {
                        entity: "NPC profile".to_string(),
                        id: input.npc_id.clone(),
                    })?;
                Ok(serde_json::to_value(profile)?)
            }
            "get_prompt_active" => {
                let input: GetPromptActiveInput = parse_input(input)?;
                let output = self.handle_get_prompt_active(&scope, &input)?;
                Ok(serde_json::to_value(output)?)
            }
            "search_content" => {
                let input: SearchContentInput = parse_input(input)?;
                // Search failures surface as empty results, never as errors.
                let items = match self.site_store.search_content(
                    &scope,
                    &input.query,
                    input.content_type.as_deref(),
                    input.tags.as_deref(),
                    input.status.as_deref(),
                    input.limit,
                ) {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(error = %e, "search_content failed, returning empty");
                        Vec::new()
                    }
                };
                Ok(serde_json::to_value(SearchContentOutput {
                    total: items.len(),
                    items,
                    query: input.query,
                })?)
            }
            "get_site_map" => {
                let input: GetSiteMapInput = parse_input(input)?;
                let site_name = self
                    .site_store
                    .get_site_name(&scope)?
                    .ok_or_else(|| ToolError::NotFound {
                        entity: "site".to_string(),
                        id: scope.site_id.clone(),
                    })?;
                let pois = if input.include_pois {
                    self.site_store.list_published_by_type(&scope, "poi")?
                } else {
                    Vec::new()
                };
                let routes = if input.include_routes {
                    self.site_store
                        .list_published_by_type(&scope, "route")?
                        .into_iter()
                        .map(|r| json!({"id": r.id, "name": r.name, "description": r.description}))
                        .collect()
                } else {
                    Vec::new()
                };
                Ok(serde_json::to_value(GetSiteMapOutput {
                    site_id: scope.site_id.clone(),
                    site_name,
                    pois,
                    routes,
                })?)
            }
            "create_draft_content" => {
                let input: CreateDraftContentInput = parse_input(input)?;
                let (content_id, created_at) = self.site_store.create_draft_content(
                    &scope,
                    &input.content_type,
                    &input.title,
                    &input.body,
                    input.summary.as_deref(),
                    &input.tags,
                    &input.domains,
                    input.source.as_deref(),
                    ctx.user_id.as_deref(),
                )?;
                Ok(serde_json::to_value(CreateDraftContentOutput {
                    content_id,
                    status: "draft".to_string(),
                    created_at,
                })?)
            }
            "log_user_event" => {
                let input: LogUserEventInput = parse_input(input)?;
                let (event_id, logged_at) = self.site_store.log_event(
                    &scope,
                    Some(&ctx.trace_id),
                    input.user_id.as_deref().or(ctx.user_id.as_deref()),
                    input.session_id.as_deref().or(ctx.session_id.as_deref()),
                    &input.event_type,
                    &input.event_data,
                )?;
                Ok(serde_json::to_value(LogUserEventOutput { event_id, logged_at })?)
            }
            "retrieve_evidence" => {
                let input: RetrieveEvidenceInput = parse_input(input)?;
                let request = RetrievalRequest {
                    query: input.query,
                    strategy: input.strategy,
                    limit: Some(input.limit),
                    min_score: Some(input.min_score),
                    domains: input.domains,
                    use_trgm: input.use_trgm,
                };
                let output = self.retriever.retrieve(&scope, &request).await;
                Ok(serde_json::to_value(output)?)
            }
            "submit_feedback" => {
                let input: SubmitFeedbackInput = parse_input(input)?;
                let (feedback_id, created_at) = self.site_store.submit_feedback(
                    &scope,
                    ctx.user_id.as_deref(),
                    &input,
                    Some(&ctx.trace_id),
                )?;
                Ok(serde_json::to_value(SubmitFeedbackOutput {
                    feedback_id,
                    status: "pending".to_string(),
                    created_at,
                })?)
            }
            "list_feedback" => {
                let input: ListFeedbackInput = parse_input(input)?;
                let (items, total) = self.site_store.list_feedback(
                    &scope,
                    input.status.as_deref(),
                    input.feedback_type.as_deref(),
                    input.severity.as_deref(),
                    input.limit,
                )?;
                Ok(serde_json::to_value(ListFeedbackOutput { items, total })?)
            }
            other => Err(ToolError::ToolNotFound(other.to_string())),
        }
    }

    fn handle_get_prompt_active(
        &self,
        scope: &Scope,
        input: &GetPromptActiveInput,
    ) -> Result<PromptInfo> {
        // Prompt registry wins.
        if let Some(row) = self
            .site_store
            .get_active_prompt(scope, &input.npc_id, &input.prompt_type)?
        {
            let policy = row.policy.clone();
            return Ok(PromptInfo {
                npc_id: row.npc_id,
                prompt_type: input.prompt_type.clone(),
                prompt_text: row.content,
                version: row.version,
                metadata: json!({
                    "source": "prompt_registry",
                    "description": row.description,
                    "author": row.author,
                    "policy": policy,
                    "require_citations": policy.get("require_citations").and_then(|v| v.as_bool()).unwrap_or(true),
                    "max_response_length": policy.get("max_response_length").and_then(|v| v.as_u64()).unwrap_or(500),
                    "forbidden_topics": policy.get("forbidden_topics").cloned().unwrap_or(json!([])),
                    "conservative_template": policy.get("conservative_template").cloned().unwrap_or(Value::Null),
                }),
            });
        }

        // Fall back to a persona-derived prompt.
        let profile = self
            .site_store
            .get_npc_profile(scope, &input.npc_id, None)?
            .ok_or_else(|| ToolError::NotFound {
                entity: "NPC profile".to_string(),
                id: input.npc_id.clone(),
            })?;

        let prompt_text = match input.prompt_type.as_str() {
            "system" => prompt::build_system_prompt(&profile),
            "greeting" => prompt::greeting_prompt(&profile),
            "fallback" => prompt::fallback_prompt(&profile),
            other => {
                return Err(ToolError::Validation(format!("unknown prompt_type: {}", other)))
            }
        };

        Ok(PromptInfo {
            npc_id: profile.npc_id.clone(),
            prompt_type: input.prompt_type.clone(),
            prompt_text,
            version: profile.version,
            metadata: json!({
                "source": "npc_profile",
                "name": profile.name,
                "display_name": profile.display_name,
                "npc_type": profile.npc_type,
                "knowledge_domains": profile.knowledge_domains,
                "max_response_length": profile.max_response_length,
                "must_cite_sources": profile.must_cite_sources,
            }),
        })
    }

    /// Persist the call as a `tool_call` ledger row. A ledger failure is a
    /// monitoring concern, not a caller-visible one.
    fn record_trace(
        &self,
        ctx: &ToolContext,
        tool_name: &str,
        audit: &ToolAudit,
        output: Option<&Value>,
        error: Option<&ToolError>,
    ) {
        let now = Utc::now().to_rfc3339();
        let mut record = TraceRecord::begin(
            ctx.trace_id.clone(),
            ctx.tenant_id.clone(),
            ctx.site_id.clone(),
            "tool_call",
            now.clone(),
        );
        record.session_id = ctx.session_id.clone();
        record.npc_id = ctx.npc_id.clone();
        record.request_input = json!({"tool_name": tool_name});
        record.tool_calls = vec![ToolCallEntry {
            name: tool_name.to_string(),
            status: audit.status.clone(),
            latency_ms: audit.latency_ms,
            retry_count: 0,
            cache_hit: false,
            error: audit.error_message.clone(),
            details: Some(json!({"payload_hash": audit.request_payload_hash})),
        }];
        record.latency_ms = Some(audit.latency_ms);
        record.status = audit.status.clone();
        record.error = error.map(|e| e.to_string());
        record.response_output = output.cloned();
        record.completed_at = Some(now);

        if let Err(e) = self.ledger.upsert(&record) {
            warn!(trace_id = %ctx.trace_id, error = %e, "tool trace write failed");
        }
    }
}

fn parse_input<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T> {
    serde_json::from_value(input.clone()).map_err(|e| ToolError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site_store::{NewNpcProfile, NewNpcPrompt};
    use loreline_evidence::{
        EvidenceStore, NewEvidence, RetrievalDefaults, SandboxEmbeddingProvider,
        UnavailableVectorIndex,
    };
    use rusqlite::Connection;

    fn executor() -> ToolExecutor {
        let site_store = Arc::new(SiteStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let evidence = Arc::new(EvidenceStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let retriever = Arc::new(Retriever::new(
            evidence,
            Arc::new(UnavailableVectorIndex::new(64)),
            Arc::new(SandboxEmbeddingProvider::new(64)),
            RetrievalDefaults {
                min_score: 0.05,
                ..RetrievalDefaults::default()
            },
        ));
        let ledger = Arc::new(TraceStore::new(Connection::open_in_memory().unwrap()).unwrap());
        ToolExecutor::new(
            ToolRegistry::with_builtin_tools(),
            site_store,
            retriever,
            ledger,
        )
    }

    fn ctx() -> ToolContext {
        ToolContext {
            tenant_id: "t1".to_string(),
            site_id: "s1".to_string(),
            trace_id: "trace-test".to_string(),
            span_id: None,
            user_id: None,
            session_id: None,
            npc_id: None,
        }
    }

    fn seed_npc(ex: &ToolExecutor) {
        ex.site_store
            .create_npc_profile(
                &Scope::new("t1", "s1"),
                "ancestor",
                NewNpcProfile {
                    name: "yan".to_string(),
                    display_name: Some("老严".to_string()),
                    npc_type: "ancestor".to_string(),
                    persona: json!({"identity": {"era": "明清"}}),
                    knowledge_domains: vec!["家训".to_string()],
                    must_cite_sources: true,
                    ..NewNpcProfile::default()
                },
                true,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_not_found() {
        let ex = executor();
        let resp = ex
            .execute(&ToolCallRequest {
                tool_name: "no_such_tool".to_string(),
                input: json!({}),
                context: ctx(),
            })
            .await;
        assert!(!resp.success);
        assert_eq!(resp.error_type.as_deref(), Some("ToolNotFound"));
    }

    #[tokio::test]
    async fn bad_input_is_validation_error() {
        let ex = executor();
        let resp = ex
            .execute(&ToolCallRequest {
                tool_name: "get_npc_profile".to_string(),
                input: json!({"wrong_field": 1}),
                context: ctx(),
            })
            .await;
        assert!(!resp.success);
        assert_eq!(resp.error_type.as_deref(), Some("ValidationError"));
    }

    #[tokio::test]
    async fn npc_profile_roundtrip_and_audit() {
        let ex = executor();
        seed_npc(&ex);
        let resp = ex
            .execute(&ToolCallRequest {
                tool_name: "get_npc_profile".to_string(),
                input: json!({"npc_id": "ancestor"}),
                context: ctx(),
            })
            .await;
        assert!(resp.success, "error: {:?}", resp.error);
        let profile: NpcProfileView = serde_json::from_value(resp.output.unwrap()).unwrap();
        assert_eq!(profile.display(), "老严");
        assert_eq!(resp.audit.status, "success");
        assert_eq!(resp.audit.request_payload_hash.len(), 16);
        assert!(resp.audit.latency_ms >= 0);
    }

    #[tokio::test]
    async fn prompt_active_prefers_registry_over_persona() {
        let ex = executor();
        seed_npc(&ex);
        let scope = Scope::new("t1", "s1");

        // Without a registry row the prompt derives from the persona.
        let resp = ex
            .execute(&ToolCallRequest {
                tool_name: "get_prompt_active".to_string(),
                input: json!({"npc_id": "ancestor"}),
                context: ctx(),
            })
            .await;
        let info: PromptInfo = serde_json::from_value(resp.output.unwrap()).unwrap();
        assert_eq!(info.source(), Some("npc_profile"));
        assert!(info.prompt_text.contains("你是老严"));

        ex.site_store
            .create_npc_prompt(
                &scope,
                "ancestor",
                "system",
                NewNpcPrompt {
                    content: "registry prompt".to_string(),
                    policy: json!({"conservative_template": "保守回答"}),
                    ..NewNpcPrompt::default()
                },
                true,
            )
            .unwrap();

        let resp = ex
            .execute(&ToolCallRequest {
                tool_name: "get_prompt_active".to_string(),
                input: json!({"npc_id": "ancestor"}),
                context: ctx(),
            })
            .await;
        let info: PromptInfo = serde_json::from_value(resp.output.unwrap()).unwrap();
        assert_eq!(info.source(), Some("prompt_registry"));
        assert_eq!(info.prompt_text, "registry prompt");
    }

    #[tokio::test]
    async fn retrieve_evidence_never_fails() {
        let ex = executor();
        ex.retriever
            .store()
            .insert(
                &Scope::new("t1", "s1"),
                NewEvidence {
                    source_type: "archive".to_string(),
                    source_ref: None,
                    title: "严氏家训".to_string(),
                    excerpt: "一曰孝悌为本".to_string(),
                    confidence: 0.9,
                    verified: true,
                    tags: vec![],
                    domains: vec![],
                },
            )
            .unwrap();

        // Hybrid with the vector side down must still answer via trigram.
        let resp = ex
            .execute(&ToolCallRequest {
                tool_name: "retrieve_evidence".to_string(),
                input: json!({"query": "严氏家训", "strategy": "hybrid"}),
                context: ctx(),
            })
            .await;
        assert!(resp.success);
        let output = resp.output.unwrap();
        assert_eq!(output["strategy_used"], "trgm_fallback");
        assert_eq!(output["items"].as_array().unwrap().len(), 1);
        assert!(output["score_distribution"].is_object());
    }

    #[test]
    fn payload_hash_is_order_independent() {
        let a = payload_hash(&json!({"b": 2, "a": 1}));
        let b = payload_hash(&json!({"a": 1, "b": 2}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, payload_hash(&json!({"a": 1, "b": 3})));
    }
}
