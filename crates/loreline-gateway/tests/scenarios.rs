//! End-to-end scenarios over the assembled core: grounded answers, gate
//! blocks, post-LLM filtering, release rollback, stable bucketing, and
//! retrieval fallback.

use std::sync::Arc;

use serde_json::json;

use loreline_core::config::LorelineConfig;
use loreline_core::{PolicyMode, Scope};
use loreline_evidence::NewEvidence;
use loreline_gateway::AppState;
use loreline_ledger::TraceFilter;
use loreline_runtime::ChatRequest;
use loreline_tools::{NewNpcProfile, NewNpcPrompt};

fn test_config() -> LorelineConfig {
    let mut config = LorelineConfig::default();
    config.database.path = ":memory:".to_string();
    config.llm.sandbox = true;
    config
}

fn scope() -> Scope {
    Scope::new("t1", "s1")
}

fn seed_npc(state: &AppState) {
    state.site_store.upsert_site(&scope(), "测试站点").unwrap();
    state
        .site_store
        .create_npc_profile(
            &scope(),
            "ancestor",
            NewNpcProfile {
                name: "yan".to_string(),
                display_name: Some("老严".to_string()),
                npc_type: "ancestor".to_string(),
                persona: json!({
                    "identity": {"era": "明清时期", "role": "族长"},
                    "personality": {"traits": ["慈祥"], "speaking_style": "文雅"}
                }),
                knowledge_domains: vec!["家训".to_string(), "建筑".to_string()],
                greeting_templates: vec![],
                fallback_responses: vec![],
                max_response_length: Some(500),
                must_cite_sources: true,
            },
            true,
        )
        .unwrap();
}

fn seed_evidence(state: &AppState) -> String {
    state
        .evidence
        .insert(
            &scope(),
            NewEvidence {
                source_type: "archive".to_string(),
                source_ref: Some("book:yanshi".to_string()),
                title: "严氏家训".to_string(),
                excerpt: "一曰孝悌为本".to_string(),
                confidence: 0.9,
                verified: true,
                tags: vec!["家训".to_string()],
                domains: vec!["家训".to_string()],
            },
        )
        .unwrap()
        .id
}

fn chat_request(query: &str) -> ChatRequest {
    ChatRequest {
        tenant_id: "t1".to_string(),
        site_id: "s1".to_string(),
        npc_id: "ancestor".to_string(),
        query: query.to_string(),
        user_id: None,
        session_id: Some("sess-e2e".to_string()),
        trace_id: None,
    }
}

// A grounded query answers normally with citations and a full trace.
#[tokio::test]
async fn grounded_answer_cites_evidence() {
    let state = AppState::build(test_config()).unwrap();
    seed_npc(&state);
    let evidence_id = seed_evidence(&state);

    let response = state.runtime.chat(chat_request("严氏家训有哪些？")).await;

    assert_eq!(response.policy_mode, PolicyMode::Normal);
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].evidence_id, evidence_id);
    assert!((response.citations[0].confidence - 0.9).abs() < 1e-9);
    assert!(!response.answer_text.is_empty());
    assert!(response.answer_text.contains("孝悌"));
    assert_eq!(response.npc_name, "老严");
    assert!(response.latency_ms >= 0);

    let trace = state
        .ledger
        .get(&scope(), &response.trace_id)
        .unwrap()
        .expect("trace written");
    assert_eq!(trace.status, "success");
    assert_eq!(trace.evidence_ids, vec![evidence_id]);
    assert!(trace.completed_at.as_deref() >= Some(trace.started_at.as_str()));
    for tool in ["get_npc_profile", "get_prompt_active", "retrieve_evidence", "llm_generate"] {
        assert!(
            trace.tool_calls.iter().any(|t| t.name == tool),
            "missing tool call {tool}"
        );
    }
}

// A fact-seeking query with an empty corpus is blocked before the LLM.
#[tokio::test]
async fn ungrounded_fact_query_is_conservative() {
    let state = AppState::build(test_config()).unwrap();
    seed_npc(&state);

    let response = state
        .runtime
        .chat(chat_request("严氏先祖在哪一年迁来的？"))
        .await;

    assert_eq!(response.policy_mode, PolicyMode::Conservative);
    assert!(response.citations.is_empty());
    assert!(!response.answer_text.is_empty());

    let trace = state
        .ledger
        .get(&scope(), &response.trace_id)
        .unwrap()
        .unwrap();
    let gate = trace
        .tool_calls
        .iter()
        .find(|t| t.name == "evidence_gate")
        .expect("gate entry");
    assert_eq!(gate.status, "blocked");
    assert_eq!(
        gate.details.as_ref().unwrap()["intent"],
        json!("fact_seeking")
    );
    // The LLM was never invoked.
    assert!(!trace.tool_calls.iter().any(|t| t.name == "llm_generate"));
}

// Release activate/rollback keeps history, and the active policy shows
// up in turn snapshots.
#[tokio::test]
async fn release_rollback_history_and_snapshot() {
    let state = AppState::build(test_config()).unwrap();
    seed_npc(&state);
    seed_evidence(&state);

    let r1 = state
        .releases
        .create(
            &scope(),
            "r1",
            None,
            json!({"evidence_gate_policy_version": "v1.0"}),
            "op",
        )
        .unwrap();
    let r2 = state
        .releases
        .create(
            &scope(),
            "r2",
            None,
            json!({"evidence_gate_policy_version": "v1.1"}),
            "op",
        )
        .unwrap();

    state.releases.activate(&r1.id, "op").unwrap();
    state.releases.activate(&r2.id, "op").unwrap();

    // A turn under R2 carries v1.1 in its strategy snapshot.
    let response = state.runtime.chat(chat_request("严氏家训有哪些？")).await;
    let trace = state
        .ledger
        .get(&scope(), &response.trace_id)
        .unwrap()
        .unwrap();
    assert_eq!(trace.release_id.as_deref(), Some(r2.id.as_str()));
    assert_eq!(
        trace.strategy_snapshot.as_ref().unwrap()["evidence_gate_policy_version"],
        json!("v1.1")
    );

    state.releases.rollback(&r1.id, "op").unwrap();
    assert_eq!(state.releases.get_active(&scope()).unwrap().unwrap().id, r1.id);

    let history = state.releases.history(&scope(), 10).unwrap();
    let actions: Vec<&str> = history.iter().rev().map(|h| h.action.as_str()).collect();
    assert_eq!(actions, vec!["activate", "activate", "rollback"]);
}

// Bucketing stays stable across repeated calls and weight changes.
#[tokio::test]
async fn experiment_bucketing_is_stable() {
    let state = AppState::build(test_config()).unwrap();
    let variants = vec![
        loreline_control::Variant {
            name: "control".to_string(),
            weight: 50,
            strategy_overrides: json!({"retrieval_strategy": "trgm"}),
        },
        loreline_control::Variant {
            name: "treatment".to_string(),
            weight: 50,
            strategy_overrides: json!({"retrieval_strategy": "hybrid"}),
        },
    ];
    let experiment = state
        .experiments
        .create(&scope(), "retrieval-ab", "session_id", variants)
        .unwrap();
    state.experiments.set_status(&experiment.id, "active").unwrap();

    let first_a = state.experiments.assign(&experiment.id, "sess-A").unwrap();
    for _ in 0..100 {
        let again = state.experiments.assign(&experiment.id, "sess-A").unwrap();
        assert_eq!(again.variant, first_a.variant);
        assert_eq!(again.bucket_hash, first_a.bucket_hash);
    }
    let first_b = state.experiments.assign(&experiment.id, "sess-B").unwrap();
    let again_b = state.experiments.assign(&experiment.id, "sess-B").unwrap();
    assert_eq!(first_b.variant, again_b.variant);

    state
        .experiments
        .update_variants(
            &experiment.id,
            vec![
                loreline_control::Variant {
                    name: "control".to_string(),
                    weight: 80,
                    strategy_overrides: json!({}),
                },
                loreline_control::Variant {
                    name: "treatment".to_string(),
                    weight: 20,
                    strategy_overrides: json!({}),
                },
            ],
        )
        .unwrap();
    let after_update = state.experiments.assign(&experiment.id, "sess-A").unwrap();
    assert_eq!(after_update.variant, first_a.variant);
}

// Hybrid retrieval with the vector index unreachable degrades to
// trigram; no exception propagates.
#[tokio::test]
async fn retrieval_falls_back_when_vector_index_down() {
    let mut config = test_config();
    // Nothing listens here; every vector call fails fast.
    config.vector.base_url = Some("http://127.0.0.1:9".to_string());
    let state = AppState::build(config).unwrap();
    seed_npc(&state);
    seed_evidence(&state);

    let output = state
        .retriever
        .retrieve(
            &scope(),
            &loreline_evidence::RetrievalRequest::new("严氏家训"),
        )
        .await;

    assert_eq!(output.strategy_used, "trgm_fallback");
    let reason = output.fallback_reason.unwrap();
    assert!(
        reason.starts_with("hybrid_error") || reason.starts_with("qdrant_unavailable"),
        "unexpected reason: {reason}"
    );
    assert!(!output.items.is_empty());
}

// Memory ordering: two sequential turns read back in acceptance order.
#[tokio::test]
async fn session_memory_preserves_turn_order() {
    let state = AppState::build(test_config()).unwrap();
    seed_npc(&state);
    seed_evidence(&state);

    state.runtime.chat(chat_request("严氏家训有哪些？")).await;
    state.runtime.chat(chat_request("再讲讲家训的来历")).await;

    let messages = state
        .memory
        .get_recent_messages(&scope(), "sess-e2e", "ancestor", None, None)
        .unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].content, "严氏家训有哪些？");
    assert_eq!(messages[2].content, "再讲讲家训的来历");
}

// Trace idempotence: re-running a turn with a pinned trace_id updates the
// existing row instead of duplicating it.
#[tokio::test]
async fn pinned_trace_id_upserts() {
    let state = AppState::build(test_config()).unwrap();
    seed_npc(&state);
    seed_evidence(&state);

    let mut request = chat_request("严氏家训有哪些？");
    request.trace_id = Some("trace-pinned".to_string());
    state.runtime.chat(request.clone()).await;
    state.runtime.chat(request).await;

    let rows = state
        .ledger
        .list(
            &scope(),
            &TraceFilter {
                request_type: Some("npc_chat".to_string()),
                ..TraceFilter::default()
            },
        )
        .unwrap();
    let pinned: Vec<_> = rows.iter().filter(|r| r.trace_id == "trace-pinned").collect();
    assert_eq!(pinned.len(), 1);
}

// A registry prompt's conservative template is used when the gate blocks.
#[tokio::test]
async fn registry_conservative_template_is_used() {
    let state = AppState::build(test_config()).unwrap();
    seed_npc(&state);
    state
        .site_store
        .create_npc_prompt(
            &scope(),
            "ancestor",
            "system",
            NewNpcPrompt {
                content: "你是老严，只讲有据可查的事。".to_string(),
                policy: json!({
                    "require_citations": true,
                    "conservative_template": "族谱的事，待我查证后再告诉你。"
                }),
                description: None,
                author: Some("editor".to_string()),
            },
            true,
        )
        .unwrap();

    let response = state
        .runtime
        .chat(chat_request("严氏先祖在哪一年迁来的？"))
        .await;
    assert_eq!(response.policy_mode, PolicyMode::Conservative);
    assert_eq!(response.answer_text, "族谱的事，待我查证后再告诉你。");
}
