//! Pipeline tests with an injected LLM provider, covering the post-LLM
//! gate, LLM failure fallback, and the turn deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::json;

use loreline_cache::{Cache, CacheKeyBuilder};
use loreline_client::{LocalTransport, ResilientToolClient};
use loreline_control::{ExperimentStore, ReleaseStore};
use loreline_core::{PolicyMode, Scope};
use loreline_evidence::{
    EvidenceStore, RetrievalDefaults, Retriever, SandboxEmbeddingProvider, UnavailableVectorIndex,
};
use loreline_gate::EvidenceGate;
use loreline_ledger::TraceStore;
use loreline_memory::{MemoryLimits, MemoryStore};
use loreline_provider::{LlmError, LlmErrorType, LlmProvider, LlmRequest, LlmResponse};
use loreline_runtime::{ChatRequest, DialogRuntime, RuntimeOptions};
use loreline_tools::{NewNpcProfile, SiteStore, ToolExecutor, ToolRegistry};

/// Provider that replies with a fixed text (or always fails).
struct ScriptedLlm {
    reply: Option<String>,
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }

    async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match &self.reply {
            Some(text) => Ok(LlmResponse {
                text: text.clone(),
                model: "scripted-1".to_string(),
                tokens_input: 10,
                tokens_output: 20,
                finish_reason: "stop".to_string(),
                latency_ms: 5,
                raw: None,
            }),
            None => Err(LlmError::new(LlmErrorType::Server, "backend down")),
        }
    }

    async fn health_check(&self) -> bool {
        self.reply.is_some()
    }
}

struct Harness {
    runtime: DialogRuntime,
    ledger: Arc<TraceStore>,
    memory: Arc<MemoryStore>,
}

fn harness(llm: Arc<dyn LlmProvider>, options: RuntimeOptions) -> Harness {
    let scope = Scope::new("t1", "s1");
    let site_store = Arc::new(SiteStore::new(Connection::open_in_memory().unwrap()).unwrap());
    site_store.upsert_site(&scope, "site").unwrap();
    site_store
        .create_npc_profile(
            &scope,
            "ancestor",
            NewNpcProfile {
                name: "yan".to_string(),
                display_name: Some("老严".to_string()),
                npc_type: "ancestor".to_string(),
                persona: json!({}),
                knowledge_domains: vec!["建筑".to_string()],
                greeting_templates: vec![],
                fallback_responses: vec![],
                max_response_length: Some(500),
                must_cite_sources: false,
            },
            true,
        )
        .unwrap();

    let evidence = Arc::new(EvidenceStore::new(Connection::open_in_memory().unwrap()).unwrap());
    let retriever = Arc::new(Retriever::new(
        evidence,
        Arc::new(UnavailableVectorIndex::new(64)),
        Arc::new(SandboxEmbeddingProvider::new(64)),
        RetrievalDefaults::default(),
    ));
    let ledger = Arc::new(TraceStore::new(Connection::open_in_memory().unwrap()).unwrap());
    let executor = Arc::new(ToolExecutor::new(
        ToolRegistry::with_builtin_tools(),
        site_store,
        retriever,
        ledger.clone(),
    ));
    let client = Arc::new(ResilientToolClient::new(
        Arc::new(LocalTransport::new(executor)),
        Arc::new(Cache::in_memory()),
        CacheKeyBuilder::default(),
    ));
    let memory = Arc::new(
        MemoryStore::new(Connection::open_in_memory().unwrap(), MemoryLimits::default()).unwrap(),
    );

    let runtime = DialogRuntime::new(
        client,
        llm,
        Arc::new(EvidenceGate::with_rule_classifier(1)),
        memory.clone(),
        ledger.clone(),
        Arc::new(ReleaseStore::new(Connection::open_in_memory().unwrap()).unwrap()),
        Arc::new(ExperimentStore::new(Connection::open_in_memory().unwrap()).unwrap()),
        options,
    );
    Harness {
        runtime,
        ledger,
        memory,
    }
}

fn request(query: &str) -> ChatRequest {
    ChatRequest {
        tenant_id: "t1".to_string(),
        site_id: "s1".to_string(),
        npc_id: "ancestor".to_string(),
        query: query.to_string(),
        user_id: None,
        session_id: Some("sess-1".to_string()),
        trace_id: None,
    }
}

// A preference query passes the pre-gate, but an ungrounded factual
// assertion in the response is filtered and the turn downgraded.
#[tokio::test]
async fn forbidden_assertion_is_filtered_post_llm() {
    let h = harness(
        Arc::new(ScriptedLlm {
            reply: Some("这座桥清朝乾隆年间修建于公元1773年。".to_string()),
        }),
        RuntimeOptions::default(),
    );

    let response = h
        .runtime
        .chat(request("我之前喜欢听建筑故事，再讲一个。"))
        .await;

    assert_eq!(response.policy_mode, PolicyMode::Conservative);
    assert!(response.citations.is_empty());
    assert!(!response.answer_text.contains("1773"));
    assert!(!response.answer_text.contains("乾隆"));
    assert!(response.answer_text.contains("清朝某个时期"));
    assert!(response.answer_text.contains("很久以前"));

    let trace = h
        .ledger
        .get(&Scope::new("t1", "s1"), &response.trace_id)
        .unwrap()
        .unwrap();
    assert!(trace
        .tool_calls
        .iter()
        .any(|t| t.name == "post_evidence_gate" && t.status == "filtered"));
}

// A fact claim that exists only in session memory must not surface as a
// grounded answer: the post-gate catches year/reign/generation forms.
#[tokio::test]
async fn memory_only_claims_cannot_be_grounded() {
    let h = harness(
        Arc::new(ScriptedLlm {
            reply: Some("你上次说过，这座祠堂距今300年了。".to_string()),
        }),
        RuntimeOptions::default(),
    );

    // Seed a memory-only "fact".
    h.memory
        .append_message(
            &Scope::new("t1", "s1"),
            "sess-1",
            "ancestor",
            &loreline_memory::Message::new(
                loreline_core::MessageRole::User,
                "这座祠堂距今300年了",
                None,
            ),
        )
        .unwrap();

    let response = h.runtime.chat(request("继续讲祠堂的故事")).await;
    assert_eq!(response.policy_mode, PolicyMode::Conservative);
    assert!(response.citations.is_empty());
    assert!(!response.answer_text.contains("300"));
}

// LLM failure with fallback enabled produces a conservative turn, not an
// error.
#[tokio::test]
async fn llm_failure_degrades_to_fallback() {
    let h = harness(Arc::new(ScriptedLlm { reply: None }), RuntimeOptions::default());

    let response = h.runtime.chat(request("你好！")).await;
    assert_eq!(response.policy_mode, PolicyMode::Conservative);
    assert!(!response.answer_text.is_empty());

    let trace = h
        .ledger
        .get(&Scope::new("t1", "s1"), &response.trace_id)
        .unwrap()
        .unwrap();
    assert_eq!(trace.status, "success");
    assert_eq!(trace.model_provider.as_deref(), Some("fallback"));
    assert!(trace
        .tool_calls
        .iter()
        .any(|t| t.name == "llm_generate" && t.status == "fallback"));
}

// LLM failure without fallback surfaces as a turn error with a trace.
#[tokio::test]
async fn llm_failure_without_fallback_errors_the_turn() {
    let h = harness(
        Arc::new(ScriptedLlm { reply: None }),
        RuntimeOptions {
            llm_fallback_enabled: false,
            ..RuntimeOptions::default()
        },
    );

    let response = h.runtime.chat(request("你好！")).await;
    assert_eq!(response.policy_mode, PolicyMode::Conservative);

    let trace = h
        .ledger
        .get(&Scope::new("t1", "s1"), &response.trace_id)
        .unwrap()
        .unwrap();
    assert_eq!(trace.status, "error");
    assert!(trace.error.is_some());
}

/// Provider that hangs past any reasonable deadline.
struct StalledLlm;

#[async_trait]
impl LlmProvider for StalledLlm {
    fn provider_name(&self) -> &str {
        "stalled"
    }

    fn model_name(&self) -> &str {
        "stalled-1"
    }

    async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Err(LlmError::new(LlmErrorType::Timeout, "unreachable"))
    }

    async fn health_check(&self) -> bool {
        false
    }
}

// Deadline expiry still emits a partial trace with error = "cancelled".
#[tokio::test]
async fn deadline_expiry_writes_partial_trace() {
    let h = harness(
        Arc::new(StalledLlm),
        RuntimeOptions {
            turn_deadline: Duration::from_millis(200),
            ..RuntimeOptions::default()
        },
    );

    let response = h.runtime.chat(request("你好！")).await;
    assert_eq!(response.policy_mode, PolicyMode::Conservative);

    let trace = h
        .ledger
        .get(&Scope::new("t1", "s1"), &response.trace_id)
        .unwrap()
        .unwrap();
    assert_eq!(trace.status, "error");
    assert_eq!(trace.error.as_deref(), Some("cancelled"));
}
