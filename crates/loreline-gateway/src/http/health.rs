use axum::{extract::State, Json};
use loreline_provider::LlmProvider;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: store reachability plus provider health.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let llm_ok = state.llm.health_check().await;
    let ledger_ok = state.ledger.scopes().is_ok();
    Json(json!({
        "status": if ledger_ok { "ok" } else { "degraded" },
        "llm_provider": {
            "name": state.llm.provider_name(),
            "model": state.llm.model_name(),
            "healthy": llm_ok,
        },
        "cache_enabled": state.cache.is_enabled(),
    }))
}

/// GET /v1/cache/stats: hit/miss/error counters.
pub async fn cache_stats_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.cache.stats.snapshot()))
}
