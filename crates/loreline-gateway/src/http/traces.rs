//! Trace ledger surface: raw row, unified replay view, filtered listing.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use loreline_ledger::{to_unified, TraceFilter};

use crate::app::AppState;
use crate::http::{internal, not_found, scope_from_headers, ErrorReply};

#[derive(Deserialize)]
pub struct GetTraceQuery {
    #[serde(default)]
    pub include_session: bool,
}

/// GET /v1/traces/{trace_id}
pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(trace_id): Path<String>,
    Query(query): Query<GetTraceQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let record = state
        .ledger
        .get(&scope, &trace_id)
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("trace not found: {}", trace_id)))?;

    let mut body = serde_json::to_value(&record).map_err(|e| internal(e.to_string()))?;
    if query.include_session {
        if let Some(session_id) = &record.session_id {
            let summary = state
                .memory
                .get_session_summary(&scope, session_id, record.npc_id.as_deref(), 5)
                .map_err(|e| internal(e.to_string()))?;
            body["session_summary"] = json!(summary);
        }
    }
    Ok(Json(body))
}

/// GET /v1/traces/{trace_id}/unified
pub async fn unified_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(trace_id): Path<String>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let record = state
        .ledger
        .get(&scope, &trace_id)
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("trace not found: {}", trace_id)))?;

    let mut unified = to_unified(&record);
    if let Some(session_id) = &record.session_id {
        if let Ok(summary) =
            state
                .memory
                .get_session_summary(&scope, session_id, record.npc_id.as_deref(), 5)
        {
            unified["session_summary"] = json!(summary);
        }
    }
    Ok(Json(unified))
}

#[derive(Deserialize)]
pub struct ListTracesQuery {
    pub session_id: Option<String>,
    pub npc_id: Option<String>,
    pub policy_mode: Option<String>,
    pub status: Option<String>,
    pub request_type: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    #[serde(default)]
    pub limit: usize,
}

/// GET /v1/traces
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListTracesQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let filter = TraceFilter {
        session_id: query.session_id,
        npc_id: query.npc_id,
        policy_mode: query.policy_mode,
        status: query.status,
        request_type: query.request_type,
        created_after: query.created_after,
        created_before: query.created_before,
        limit: query.limit,
    };
    let records = state
        .ledger
        .list(&scope, &filter)
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({
        "items": records,
        "total": records.len(),
    })))
}
