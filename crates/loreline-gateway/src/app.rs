//! Shared application state and router assembly.

use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use rusqlite::Connection;

use loreline_alerts::{AlertStore, AlertsEvaluator, AlertsManager};
use loreline_cache::{Cache, CacheKeyBuilder};
use loreline_client::{LocalTransport, ResilientToolClient};
use loreline_control::{ExperimentStore, PolicyStore, ReleaseStore};
use loreline_core::config::LorelineConfig;
use loreline_evidence::{
    EmbeddingProvider, EvidenceStore, HttpEmbeddingProvider, HttpVectorIndex, Indexer,
    InMemoryVectorIndex, RetrievalDefaults, Retriever, SandboxEmbeddingProvider, VectorIndex,
};
use loreline_gate::{EvidenceGate, IntentClassifier, LlmIntentClassifier, RuleIntentClassifier};
use loreline_ledger::TraceStore;
use loreline_memory::{MemoryLimits, MemoryStore};
use loreline_provider::{HttpLlmProvider, LlmProvider, SandboxLlmProvider};
use loreline_runtime::{DialogRuntime, RuntimeOptions};
use loreline_tools::{SiteStore, ToolExecutor, ToolRegistry};

/// Central shared state, passed as `Arc<AppState>` to all handlers.
pub struct AppState {
    pub config: LorelineConfig,
    pub cache: Arc<Cache>,
    pub site_store: Arc<SiteStore>,
    pub evidence: Arc<EvidenceStore>,
    pub retriever: Arc<Retriever>,
    pub indexer: Arc<Indexer>,
    pub executor: Arc<ToolExecutor>,
    pub llm: Arc<dyn LlmProvider>,
    pub memory: Arc<MemoryStore>,
    pub ledger: Arc<TraceStore>,
    pub policies: Arc<PolicyStore>,
    pub releases: Arc<ReleaseStore>,
    pub experiments: Arc<ExperimentStore>,
    pub alerts: Arc<AlertsManager>,
    pub runtime: DialogRuntime,
}

impl AppState {
    /// Wire the whole core from config. Every store opens its own
    /// connection to the shared database file.
    pub fn build(config: LorelineConfig) -> anyhow::Result<Self> {
        let open = || -> anyhow::Result<Connection> {
            if config.database.path == ":memory:" {
                Ok(Connection::open_in_memory()?)
            } else {
                if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Ok(Connection::open(&config.database.path)?)
            }
        };

        let cache = Arc::new(if config.cache.enabled {
            Cache::in_memory()
        } else {
            Cache::disabled()
        });
        let keys = CacheKeyBuilder::new(config.cache.key_prefix.clone());

        // Retrieval stack: evidence store + embedding + vector index.
        let evidence = Arc::new(EvidenceStore::new(open()?)?);
        let embedder: Arc<dyn EmbeddingProvider> = match &config.embedding.base_url {
            Some(base_url) => Arc::new(HttpEmbeddingProvider::new(
                base_url.clone(),
                config.embedding.api_key.clone(),
                config.embedding.model.clone(),
                config.embedding.dimension,
            )),
            None => Arc::new(SandboxEmbeddingProvider::new(config.embedding.dimension)),
        };
        let vector: Arc<dyn VectorIndex> = match &config.vector.base_url {
            Some(base_url) => Arc::new(HttpVectorIndex::new(
                base_url.clone(),
                config.vector.collection.clone(),
                config.vector.dimension,
            )),
            None => Arc::new(InMemoryVectorIndex::new(config.vector.dimension)),
        };
        let defaults = RetrievalDefaults {
            strategy: config
                .retrieval
                .strategy
                .parse()
                .unwrap_or(loreline_evidence::RetrievalStrategy::Hybrid),
            trgm_weight: config.retrieval.trgm_weight,
            qdrant_weight: config.retrieval.vector_weight,
            min_score: config.retrieval.min_score,
            limit: config.retrieval.limit,
        };
        let retriever = Arc::new(Retriever::new(
            evidence.clone(),
            vector.clone(),
            embedder.clone(),
            defaults,
        ));
        let indexer = Arc::new(Indexer::new(evidence.clone(), vector, embedder, 64));

        // Tool service and its consumer-side client.
        let site_store = Arc::new(SiteStore::new(open()?)?);
        let ledger = Arc::new(TraceStore::new(open()?)?);
        let executor = Arc::new(ToolExecutor::new(
            ToolRegistry::with_builtin_tools(),
            site_store.clone(),
            retriever.clone(),
            ledger.clone(),
        ));
        let client = Arc::new(ResilientToolClient::new(
            Arc::new(LocalTransport::new(executor.clone())),
            cache.clone(),
            keys,
        ));

        // LLM provider.
        let llm: Arc<dyn LlmProvider> = if config.llm.sandbox || config.llm.base_url.is_none() {
            Arc::new(SandboxLlmProvider::new(config.llm.model.clone()))
        } else {
            Arc::new(HttpLlmProvider::new(
                config.llm.base_url.clone().unwrap_or_default(),
                config.llm.api_key.clone(),
                config.llm.model.clone(),
                std::time::Duration::from_secs(config.llm.timeout_seconds),
                config.llm.max_retries,
                std::time::Duration::from_millis(config.llm.base_retry_delay_ms),
            ))
        };

        // Evidence gate with the configured classifier.
        let classifier: Arc<dyn IntentClassifier> = if config.gate.use_llm_classifier {
            Arc::new(LlmIntentClassifier::new(
                llm.clone(),
                cache.clone(),
                std::time::Duration::from_secs(config.gate.classifier_cache_ttl),
            ))
        } else {
            Arc::new(RuleIntentClassifier::new())
        };
        let gate = Arc::new(EvidenceGate::new(
            config.gate.min_citations_for_fact,
            classifier,
        ));

        let memory = Arc::new(MemoryStore::new(
            open()?,
            MemoryLimits {
                max_messages: config.memory.max_messages,
                max_chars: config.memory.max_chars,
                ttl_seconds: config.memory.ttl_seconds,
            },
        )?);

        // Control plane.
        let policies = Arc::new(PolicyStore::new(open()?)?);
        let releases = Arc::new(ReleaseStore::new(open()?)?);
        let experiments = Arc::new(ExperimentStore::new(open()?)?);

        // Alerts.
        let alerts = Arc::new(AlertsManager::new(
            AlertsEvaluator::new(policies.clone(), ledger.clone()),
            Arc::new(AlertStore::new(open()?)?),
            releases.clone(),
            experiments.clone(),
            config.alerts.webhook_url.clone(),
        ));

        let runtime = DialogRuntime::new(
            client,
            llm.clone(),
            gate,
            memory.clone(),
            ledger.clone(),
            releases.clone(),
            experiments.clone(),
            RuntimeOptions {
                memory_enabled: config.memory.enabled,
                llm_fallback_enabled: config.llm.fallback_enabled,
                temperature: config.llm.temperature,
                turn_deadline: std::time::Duration::from_secs(config.runtime.turn_deadline_seconds),
            },
        );

        Ok(Self {
            config,
            cache,
            site_store,
            evidence,
            retriever,
            indexer,
            executor,
            llm,
            memory,
            ledger,
            policies,
            releases,
            experiments,
            alerts,
            runtime,
        })
    }
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/tools/list", post(crate::http::tools::list_handler))
        .route("/tools/call", post(crate::http::tools::call_handler))
        .route("/v1/npc/chat", post(crate::http::chat::chat_handler))
        .route("/v1/traces/{trace_id}", get(crate::http::traces::get_handler))
        .route(
            "/v1/traces/{trace_id}/unified",
            get(crate::http::traces::unified_handler),
        )
        .route("/v1/traces", get(crate::http::traces::list_handler))
        .route(
            "/v1/sessions/{session_id}",
            get(crate::http::sessions::summary_handler)
                .delete(crate::http::sessions::clear_handler),
        )
        .route(
            "/v1/sessions/{session_id}/preference",
            put(crate::http::sessions::preference_handler),
        )
        .route(
            "/v1/policies/evidence-gate/active",
            get(crate::http::policies::active_handler),
        )
        .route(
            "/v1/policies/evidence-gate/versions",
            get(crate::http::policies::versions_handler),
        )
        .route(
            "/v1/policies/evidence-gate",
            post(crate::http::policies::create_handler),
        )
        .route(
            "/v1/policies/evidence-gate/rollback/{version}",
            post(crate::http::policies::rollback_handler),
        )
        .route(
            "/v1/policies/evidence-gate/export",
            post(crate::http::policies::export_handler),
        )
        .route("/v1/releases", post(crate::http::releases::create_handler))
        .route(
            "/v1/releases/active",
            get(crate::http::releases::active_handler),
        )
        .route(
            "/v1/releases/{id}/activate",
            post(crate::http::releases::activate_handler),
        )
        .route(
            "/v1/releases/{id}/rollback",
            post(crate::http::releases::rollback_handler),
        )
        .route(
            "/v1/releases/history",
            get(crate::http::releases::history_handler),
        )
        .route(
            "/v1/experiments",
            post(crate::http::experiments::create_handler),
        )
        .route(
            "/v1/experiments/{id}/status",
            patch(crate::http::experiments::status_handler),
        )
        .route(
            "/v1/experiments/active",
            get(crate::http::experiments::active_handler),
        )
        .route(
            "/v1/experiments/assign",
            get(crate::http::experiments::assign_handler),
        )
        .route(
            "/v1/experiments/ab-summary",
            get(crate::http::experiments::ab_summary_handler),
        )
        .route("/v1/alerts/rules", get(crate::http::alerts::rules_handler))
        .route(
            "/v1/alerts/evaluate",
            get(crate::http::alerts::evaluate_handler),
        )
        .route("/v1/alerts/summary", get(crate::http::alerts::summary_handler))
        .route("/v1/alerts/events", get(crate::http::alerts::events_handler))
        .route(
            "/v1/alerts/silences",
            get(crate::http::alerts::list_silences_handler)
                .post(crate::http::alerts::create_silence_handler),
        )
        .route(
            "/v1/alerts/silences/{id}",
            delete(crate::http::alerts::delete_silence_handler),
        )
        .route(
            "/v1/cache/stats",
            get(crate::http::health::cache_stats_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
