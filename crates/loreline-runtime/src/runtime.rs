//! The per-request dialog pipeline.
//!
//! Fixed step order (observable in traces): resolve ids → persona → prompt
//! → session memory → retrieval → pre-gate → LLM → post-gate → output
//! validation → memory write → trace write. The whole turn runs under a
//! deadline; expiry still produces a partial trace.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use loreline_client::ResilientToolClient;
use loreline_control::{payload, ExperimentAssignment, ExperimentStore, ReleaseStore};
use loreline_core::{CitationItem, MessageRole, PolicyMode, Scope, SessionId, ToolContext, TraceId};
use loreline_evidence::{RetrievalHit, RetrievalOutput};
use loreline_gate::{EvidenceGate, GateResult, IntentContext, IntentLabel};
use loreline_ledger::{ToolCallEntry, TraceRecord, TraceStore};
use loreline_memory::{build_context_prompt, MemoryStore, Message};
use loreline_provider::{CitationRef, LlmProvider, LlmRequest, LlmResponse};
use loreline_tools::{prompt as prompt_builder, NpcProfileView, PromptInfo};

use crate::followup;
use crate::types::{ChatRequest, ChatResponse};
use crate::validator::OutputValidator;

const APOLOGY_TEXT: &str = "抱歉，系统暂时无法处理您的请求，请稍后再试。";
const DEFAULT_CONSERVATIVE_TEMPLATE: &str =
    "这个问题我不太清楚，建议您询问村中其他长辈或查阅相关文献。";
const CITATION_EXCERPT_CLIP: usize = 100;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub memory_enabled: bool,
    pub llm_fallback_enabled: bool,
    pub temperature: f64,
    pub turn_deadline: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            memory_enabled: true,
            llm_fallback_enabled: true,
            temperature: 0.7,
            turn_deadline: Duration::from_secs(30),
        }
    }
}

pub struct DialogRuntime {
    client: Arc<ResilientToolClient>,
    llm: Arc<dyn LlmProvider>,
    gate: Arc<EvidenceGate>,
    memory: Arc<MemoryStore>,
    ledger: Arc<TraceStore>,
    releases: Arc<ReleaseStore>,
    experiments: Arc<ExperimentStore>,
    validator: OutputValidator,
    options: RuntimeOptions,
    /// Serialises the user+assistant append pair per `(session, npc)` so
    /// interleaved turns cannot split a pair.
    session_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl DialogRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<ResilientToolClient>,
        llm: Arc<dyn LlmProvider>,
        gate: Arc<EvidenceGate>,
        memory: Arc<MemoryStore>,
        ledger: Arc<TraceStore>,
        releases: Arc<ReleaseStore>,
        experiments: Arc<ExperimentStore>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            client,
            llm,
            gate,
            memory,
            ledger,
            releases,
            experiments,
            validator: OutputValidator::new(),
            options,
            session_locks: DashMap::new(),
        }
    }

    /// Handle one turn. Never returns an error: every failure path becomes
    /// a conservative response with a trace behind it.
    pub async fn chat(&self, request: ChatRequest) -> ChatResponse {
        let start = Instant::now();
        let trace_id = request
            .trace_id
            .clone()
            .map(TraceId::from)
            .unwrap_or_default();
        let session_id = request
            .session_id
            .clone()
            .map(SessionId::from)
            .unwrap_or_default();
        let started_at = Utc::now().to_rfc3339();

        if let Err(reason) = request.validate() {
            let latency_ms = start.elapsed().as_millis() as i64;
            self.write_error_trace(&request, &trace_id, &session_id, &started_at, &reason, vec![], latency_ms);
            return error_response(&trace_id, &session_id, latency_ms);
        }

        match tokio::time::timeout(
            self.options.turn_deadline,
            self.run_turn(&request, &trace_id, &session_id, &started_at, start),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => {
                let latency_ms = start.elapsed().as_millis() as i64;
                error!(trace_id = %trace_id, latency_ms, "turn deadline exceeded");
                let audits = self.client.drain_audits();
                self.write_error_trace(
                    &request,
                    &trace_id,
                    &session_id,
                    &started_at,
                    "cancelled",
                    audits,
                    latency_ms,
                );
                error_response(&trace_id, &session_id, latency_ms)
            }
        }
    }

    async fn run_turn(
        &self,
        request: &ChatRequest,
        trace_id: &TraceId,
        session_id: &SessionId,
        started_at: &str,
        start: Instant,
    ) -> ChatResponse {
        let scope = Scope::new(request.tenant_id.clone(), request.site_id.clone());
        let mut ctx = ToolContext::new(&scope, trace_id);
        ctx.user_id = request.user_id.clone();
        ctx.session_id = Some(session_id.to_string());
        ctx.npc_id = Some(request.npc_id.clone());

        info!(
            trace_id = %trace_id,
            npc_id = %request.npc_id,
            tenant_id = %scope.tenant_id,
            site_id = %scope.site_id,
            query = %clip(&request.query, 50),
            "chat start"
        );

        let mut tool_calls: Vec<ToolCallEntry> = Vec::new();

        // 3. Persona. Critical: no persona, no turn.
        let Some(profile) = self
            .client
            .get_npc_profile(&request.npc_id, &ctx, None)
            .await
        else {
            let latency_ms = start.elapsed().as_millis() as i64;
            let mut audits = self.client.drain_audits();
            tool_calls.append(&mut audits);
            self.write_error_trace(
                request,
                trace_id,
                session_id,
                started_at,
                &format!("NPC not found: {}", request.npc_id),
                tool_calls,
                latency_ms,
            );
            return error_response(trace_id, session_id, latency_ms);
        };
        let npc_name = profile.display().to_string();

        // 4. Active prompt, falling back to a persona-derived one.
        let prompt_info = self
            .client
            .get_prompt_active(&request.npc_id, &ctx, "system")
            .await;
        let (system_prompt, prompt_version, prompt_source, prompt_policy) =
            resolve_prompt(&profile, prompt_info.as_ref());
        let conservative_template = prompt_policy
            .as_ref()
            .and_then(|p| p.get("conservative_template"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| DEFAULT_CONSERVATIVE_TEMPLATE.to_string());

        // 5. Session memory and preference, disclaimer-wrapped.
        let conversation_context = if self.options.memory_enabled {
            let context = self.conversation_context(&scope, session_id.as_str(), &request.npc_id, &npc_name);
            if !context.is_empty() {
                tool_calls.push(ToolCallEntry::new("get_session_memory", "success", 0));
            }
            context
        } else {
            String::new()
        };

        // Control-plane read-through: active release and experiment variant.
        let release = self.releases.get_active(&scope).ok().flatten();
        let release_id = release.as_ref().map(|r| r.id.clone());
        let assignment = self.resolve_assignment(release.as_ref(), session_id.as_str(), request.user_id.as_deref());
        let strategy_override = assignment.as_ref().and_then(|a| {
            a.strategy_overrides
                .get("retrieval_strategy")
                .and_then(|v| v.as_str())
                .map(String::from)
        });
        let strategy_snapshot = release.as_ref().map(|r| {
            let mut snapshot = r.payload.clone();
            if let Some(a) = &assignment {
                snapshot["experiment_variant"] = json!(a.variant);
                snapshot["experiment_variant_overrides"] = a.strategy_overrides.clone();
            }
            snapshot
        });

        // 6. Evidence retrieval. Never errors; empty falls back to content
        // search.
        let retrieval = self
            .retrieve_evidence(request, &profile, &ctx, strategy_override.as_deref())
            .await;
        let citations = to_citations(&retrieval.items);
        let evidence_ids: Vec<String> = retrieval.items.iter().map(|h| h.id.clone()).collect();

        // 7. Pre-LLM gate.
        let intent_context = IntentContext {
            recent_summary: (!conversation_context.is_empty()).then(|| clip(&conversation_context, 400)),
            knowledge_domains: profile.knowledge_domains.clone(),
        };
        let gate_result = self
            .gate
            .check_before_llm(&request.query, &citations, Some(&intent_context))
            .await;
        tool_calls.push(gate_entry(&gate_result));

        if !gate_result.passed {
            warn!(trace_id = %trace_id, reason = %gate_result.reason, "evidence gate blocked");
            let answer_text = if gate_result.intent == IntentLabel::FactSeeking
                && prompt_policy.is_some()
            {
                conservative_template.clone()
            } else {
                self.gate.conservative_response(gate_result.intent, &npc_name)
            };
            return self
                .finish_turn(FinishTurn {
                    request,
                    trace_id,
                    session_id,
                    started_at,
                    start,
                    ctx: &ctx,
                    npc_name,
                    profile: &profile,
                    answer_text,
                    policy_mode: PolicyMode::Conservative,
                    policy_reason: Some(gate_result.reason.clone()),
                    citations: vec![],
                    evidence_ids,
                    hits: &retrieval.items,
                    tool_calls,
                    llm_response: None,
                    prompt_version,
                    prompt_source,
                    persona_version: profile.version,
                    release_id,
                    assignment,
                    strategy_snapshot,
                })
                .await;
        }

        // 8. LLM generation.
        let llm_request = self.build_llm_request(
            request,
            &profile,
            &system_prompt,
            &conversation_context,
            &citations,
            trace_id,
        );
        let llm_response = if self.options.llm_fallback_enabled {
            self.llm
                .generate_with_fallback(&llm_request, &conservative_template)
                .await
        } else {
            match self.llm.generate(&llm_request).await {
                Ok(response) => response,
                Err(e) => {
                    let latency_ms = start.elapsed().as_millis() as i64;
                    let mut audits = self.client.drain_audits();
                    tool_calls.append(&mut audits);
                    tool_calls.push(llm_entry(None, Some(&e.to_string()), self.llm.as_ref()));
                    self.write_error_trace(
                        request,
                        trace_id,
                        session_id,
                        started_at,
                        &e.to_string(),
                        tool_calls,
                        latency_ms,
                    );
                    return error_response(trace_id, session_id, latency_ms);
                }
            }
        };
        let llm_fallback = llm_response.finish_reason == "fallback";
        tool_calls.push(llm_entry(Some(&llm_response), None, self.llm.as_ref()));

        // 9. Post-LLM gate.
        let mut answer_text = llm_response.text.clone();
        let mut policy_mode = PolicyMode::Normal;
        let mut policy_reason = None;
        let post_gate =
            self.gate
                .check_after_llm(&request.query, &answer_text, &citations, gate_result.intent);
        if !post_gate.passed {
            if gate_result.requires_filtering {
                answer_text = self.gate.filter_forbidden_assertions(&answer_text);
            }
            policy_mode = PolicyMode::Conservative;
            policy_reason = Some(post_gate.reason.clone());
            tool_calls.push(ToolCallEntry {
                name: "post_evidence_gate".to_string(),
                status: "filtered".to_string(),
                latency_ms: 0,
                retry_count: 0,
                cache_hit: false,
                error: None,
                details: Some(json!({
                    "forbidden_assertions": post_gate.forbidden_assertions.iter().take(3).collect::<Vec<_>>(),
                })),
            });
        }

        // 10. Output validation.
        let outcome =
            self.validator
                .validate(&answer_text, &citations, &profile, gate_result.intent);
        if outcome.policy_mode != PolicyMode::Normal {
            policy_mode = outcome.policy_mode;
            policy_reason = outcome.reason.clone().or(policy_reason);
        }
        answer_text = outcome.text;
        if llm_fallback && policy_mode == PolicyMode::Normal {
            policy_mode = PolicyMode::Conservative;
            policy_reason = Some("llm_fallback".to_string());
        }

        let final_citations = if policy_mode == PolicyMode::Normal {
            citations.clone()
        } else {
            vec![]
        };

        self.finish_turn(FinishTurn {
            request,
            trace_id,
            session_id,
            started_at,
            start,
            ctx: &ctx,
            npc_name,
            profile: &profile,
            answer_text,
            policy_mode,
            policy_reason,
            citations: final_citations,
            evidence_ids,
            hits: &retrieval.items,
            tool_calls,
            llm_response: Some(llm_response),
            prompt_version,
            prompt_source,
            persona_version: profile.version,
            release_id,
            assignment,
            strategy_snapshot,
        })
        .await
    }

    /// Common tail of the pipeline: memory write, analytics event, trace
    /// write, follow-ups, response.
    async fn finish_turn(&self, turn: FinishTurn<'_>) -> ChatResponse {
        // 11. Session memory append. Never fatal.
        if self.options.memory_enabled {
            self.save_turn(
                &turn.ctx.scope(),
                turn.session_id.as_str(),
                &turn.request.npc_id,
                &turn.request.query,
                &turn.answer_text,
                turn.trace_id.as_str(),
            )
            .await;
        }

        // Analytics event, fire-and-forget.
        self.client
            .log_user_event(
                "npc_chat",
                json!({
                    "npc_id": turn.request.npc_id,
                    "query": clip(&turn.request.query, 100),
                    "policy_mode": turn.policy_mode.as_str(),
                    "evidence_count": turn.evidence_ids.len(),
                }),
                turn.ctx,
            )
            .await;

        let latency_ms = turn.start.elapsed().as_millis() as i64;

        // 12. Trace write, with the client audit buffer flushed in.
        let mut tool_calls = turn.tool_calls;
        let mut audits = self.client.drain_audits();
        tool_calls.append(&mut audits);

        let mut record = TraceRecord::begin(
            turn.trace_id.to_string(),
            turn.request.tenant_id.clone(),
            turn.request.site_id.clone(),
            "npc_chat",
            turn.started_at.to_string(),
        );
        record.session_id = Some(turn.session_id.to_string());
        record.npc_id = Some(turn.request.npc_id.clone());
        record.request_input = json!({
            "query": turn.request.query,
            "npc_id": turn.request.npc_id,
            "session_id": turn.session_id.as_str(),
        });
        record.tool_calls = tool_calls;
        record.evidence_ids = turn.evidence_ids;
        record.policy_mode = turn.policy_mode.as_str().to_string();
        record.policy_reason = turn.policy_reason;
        record.response_output = Some(json!({
            "answer_text": clip(&turn.answer_text, 500),
            "citations": turn.citations,
        }));
        record.prompt_version = turn.prompt_version;
        record.prompt_source = turn.prompt_source;
        record.persona_version = Some(turn.persona_version);
        if let Some(llm) = &turn.llm_response {
            let fallback = llm.finish_reason == "fallback";
            record.model_provider = Some(if fallback {
                "fallback".to_string()
            } else {
                self.llm.provider_name().to_string()
            });
            record.model_name = Some(llm.model.clone());
            record.tokens_input = Some(llm.tokens_input as i64);
            record.tokens_output = Some(llm.tokens_output as i64);
        }
        record.latency_ms = Some(latency_ms);
        record.status = "success".to_string();
        record.completed_at = Some(Utc::now().to_rfc3339());
        record.release_id = turn.release_id;
        if let Some(a) = &turn.assignment {
            if !a.experiment_id.is_empty() {
                record.experiment_id = Some(a.experiment_id.clone());
                record.experiment_variant = Some(a.variant.clone());
            }
        }
        record.strategy_snapshot = turn.strategy_snapshot;

        if let Err(e) = self.ledger.upsert(&record) {
            warn!(trace_id = %turn.trace_id, error = %e, "trace write failed");
        }

        // 13. Response.
        let followup_questions = followup::generate(turn.profile, turn.hits);
        info!(
            trace_id = %turn.trace_id,
            policy_mode = turn.policy_mode.as_str(),
            latency_ms,
            "chat complete"
        );
        ChatResponse {
            trace_id: turn.trace_id.to_string(),
            session_id: turn.session_id.to_string(),
            policy_mode: turn.policy_mode,
            answer_text: turn.answer_text,
            citations: turn.citations,
            followup_questions,
            npc_name: turn.npc_name,
            latency_ms,
        }
    }

    async fn retrieve_evidence(
        &self,
        request: &ChatRequest,
        profile: &NpcProfileView,
        ctx: &ToolContext,
        strategy_override: Option<&str>,
    ) -> RetrievalOutput {
        let domains = (!profile.knowledge_domains.is_empty()).then_some(profile.knowledge_domains.as_slice());
        let output = self
            .client
            .retrieve_evidence(&request.query, ctx, domains, 5, strategy_override)
            .await;
        if !output.items.is_empty() {
            return output;
        }

        // Content search as a secondary source when evidence is empty.
        let contents = self.client.search_content(&request.query, ctx, 5).await;
        if contents.is_empty() {
            return output;
        }
        let items: Vec<RetrievalHit> = contents
            .into_iter()
            .map(|c| RetrievalHit {
                source_ref: Some(format!("content:{}", c.id)),
                id: c.id,
                source_type: "knowledge_base".to_string(),
                title: c.title,
                excerpt: clip(&c.body, 300),
                confidence: c.credibility_score,
                verified: c.verified,
                tags: c.tags,
                retrieval_score: None,
                trgm_score: None,
                qdrant_score: None,
            })
            .collect();
        RetrievalOutput {
            total: items.len(),
            items,
            query: request.query.clone(),
            strategy_used: "content_fallback".to_string(),
            fallback_reason: output.fallback_reason,
            score_distribution: None,
        }
    }

    fn resolve_assignment(
        &self,
        release: Option<&loreline_control::Release>,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Option<ExperimentAssignment> {
        let experiment_id = payload::experiment_id(&release?.payload)?.to_string();
        let subject_key = if !session_id.is_empty() {
            session_id.to_string()
        } else {
            user_id?.to_string()
        };
        match self.experiments.assign(&experiment_id, &subject_key) {
            Ok(assignment) => Some(assignment),
            Err(e) => {
                warn!(error = %e, experiment_id, "experiment assignment failed");
                None
            }
        }
    }

    fn build_llm_request(
        &self,
        request: &ChatRequest,
        profile: &NpcProfileView,
        system_prompt: &str,
        conversation_context: &str,
        citations: &[CitationItem],
        trace_id: &TraceId,
    ) -> LlmRequest {
        let full_system_prompt = if conversation_context.is_empty() {
            system_prompt.to_string()
        } else {
            format!("{}\n\n{}", system_prompt, conversation_context)
        };
        let mut context = serde_json::Map::new();
        context.insert("npc_name".to_string(), json!(profile.display()));
        context.insert("npc_type".to_string(), json!(profile.npc_type));
        context.insert(
            "knowledge_domains".to_string(),
            json!(profile.knowledge_domains),
        );

        LlmRequest {
            system_prompt: full_system_prompt,
            user_message: request.query.clone(),
            context,
            citations: citations
                .iter()
                .map(|c| CitationRef {
                    id: c.evidence_id.clone(),
                    title: c.title.clone(),
                    source_ref: c.source_ref.clone(),
                    excerpt: c.excerpt.clone(),
                })
                .collect(),
            max_tokens: profile.max_response_length.unwrap_or(500),
            temperature: self.options.temperature,
            trace_id: trace_id.to_string(),
            npc_id: Some(request.npc_id.clone()),
        }
    }

    fn conversation_context(
        &self,
        scope: &Scope,
        session_id: &str,
        npc_id: &str,
        npc_name: &str,
    ) -> String {
        let mut parts = Vec::new();
        match self.memory.get_preference(scope, session_id) {
            Ok(preference) => {
                if let Some(rendered) = preference.to_prompt_format() {
                    parts.push(rendered);
                }
            }
            Err(e) => warn!(error = %e, "preference read failed"),
        }
        match self
            .memory
            .get_recent_messages(scope, session_id, npc_id, None, None)
        {
            Ok(messages) if !messages.is_empty() => {
                parts.push(build_context_prompt(&messages, npc_name));
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "memory read failed"),
        }
        parts.join("\n\n")
    }

    async fn save_turn(
        &self,
        scope: &Scope,
        session_id: &str,
        npc_id: &str,
        query: &str,
        answer: &str,
        trace_id: &str,
    ) {
        let lock_key = format!("{}:{}:{}", scope, session_id, npc_id);
        let lock = self
            .session_locks
            .entry(lock_key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let user = Message::new(MessageRole::User, query, Some(trace_id.to_string()));
        let assistant = Message::new(MessageRole::Assistant, answer, Some(trace_id.to_string()));
        for message in [user, assistant] {
            if let Err(e) = self.memory.append_message(scope, session_id, npc_id, &message) {
                warn!(session_id, npc_id, error = %e, "memory append failed");
                return;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_error_trace(
        &self,
        request: &ChatRequest,
        trace_id: &TraceId,
        session_id: &SessionId,
        started_at: &str,
        error_text: &str,
        tool_calls: Vec<ToolCallEntry>,
        latency_ms: i64,
    ) {
        let mut record = TraceRecord::begin(
            trace_id.to_string(),
            request.tenant_id.clone(),
            request.site_id.clone(),
            "npc_chat",
            started_at.to_string(),
        );
        record.session_id = Some(session_id.to_string());
        record.npc_id = Some(request.npc_id.clone());
        record.request_input = json!({
            "query": clip(&request.query, 1000),
            "npc_id": request.npc_id,
        });
        record.tool_calls = tool_calls;
        record.policy_mode = PolicyMode::Conservative.as_str().to_string();
        record.status = "error".to_string();
        record.error = Some(error_text.to_string());
        record.latency_ms = Some(latency_ms);
        record.completed_at = Some(Utc::now().to_rfc3339());
        if let Err(e) = self.ledger.upsert(&record) {
            warn!(trace_id = %trace_id, error = %e, "error trace write failed");
        }
    }
}

/// Everything `finish_turn` needs; grouped so the happy and blocked paths
/// share one tail.
struct FinishTurn<'a> {
    request: &'a ChatRequest,
    trace_id: &'a TraceId,
    session_id: &'a SessionId,
    started_at: &'a str,
    start: Instant,
    ctx: &'a ToolContext,
    npc_name: String,
    profile: &'a NpcProfileView,
    answer_text: String,
    policy_mode: PolicyMode,
    policy_reason: Option<String>,
    citations: Vec<CitationItem>,
    evidence_ids: Vec<String>,
    hits: &'a [RetrievalHit],
    tool_calls: Vec<ToolCallEntry>,
    llm_response: Option<LlmResponse>,
    prompt_version: Option<i64>,
    prompt_source: Option<String>,
    persona_version: i64,
    release_id: Option<String>,
    assignment: Option<ExperimentAssignment>,
    strategy_snapshot: Option<Value>,
}

fn resolve_prompt(
    profile: &NpcProfileView,
    prompt_info: Option<&PromptInfo>,
) -> (String, Option<i64>, Option<String>, Option<Value>) {
    match prompt_info {
        Some(info) => {
            let source = info.source().unwrap_or("unknown").to_string();
            let policy = info.policy().cloned().filter(|p| !p.is_null());
            (
                info.prompt_text.clone(),
                Some(info.version),
                Some(source),
                policy,
            )
        }
        None => (
            prompt_builder::build_system_prompt(profile),
            None,
            Some("fallback".to_string()),
            None,
        ),
    }
}

fn to_citations(hits: &[RetrievalHit]) -> Vec<CitationItem> {
    hits.iter()
        .map(|h| CitationItem {
            evidence_id: h.id.clone(),
            title: h.title.clone(),
            source_ref: h.source_ref.clone(),
            excerpt: (!h.excerpt.is_empty()).then(|| clip(&h.excerpt, CITATION_EXCERPT_CLIP)),
            confidence: h.confidence,
        })
        .collect()
}

fn gate_entry(result: &GateResult) -> ToolCallEntry {
    ToolCallEntry {
        name: "evidence_gate".to_string(),
        status: if result.passed { "passed" } else { "blocked" }.to_string(),
        latency_ms: 0,
        retry_count: 0,
        cache_hit: false,
        error: None,
        details: Some(json!({
            "intent": result.intent.as_str(),
            "citations_count": result.citations_count,
            "reason": result.reason,
            "classifier": result.classifier_type,
        })),
    }
}

fn llm_entry(
    response: Option<&LlmResponse>,
    error: Option<&str>,
    provider: &dyn LlmProvider,
) -> ToolCallEntry {
    let status = match (response, error) {
        (Some(r), _) if r.finish_reason == "fallback" => "fallback",
        (Some(_), _) => "success",
        _ => "error",
    };
    ToolCallEntry {
        name: "llm_generate".to_string(),
        status: status.to_string(),
        latency_ms: response.map(|r| r.latency_ms as i64).unwrap_or(0),
        retry_count: 0,
        cache_hit: false,
        error: error.map(String::from),
        details: Some(json!({
            "provider": provider.provider_name(),
            "model": response.map(|r| r.model.clone()).unwrap_or_else(|| provider.model_name().to_string()),
            "tokens_input": response.map(|r| r.tokens_input).unwrap_or(0),
            "tokens_output": response.map(|r| r.tokens_output).unwrap_or(0),
        })),
    }
}

fn error_response(trace_id: &TraceId, session_id: &SessionId, latency_ms: i64) -> ChatResponse {
    ChatResponse {
        trace_id: trace_id.to_string(),
        session_id: session_id.to_string(),
        policy_mode: PolicyMode::Conservative,
        answer_text: APOLOGY_TEXT.to_string(),
        citations: vec![],
        followup_questions: vec![],
        npc_name: String::new(),
        latency_ms,
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
