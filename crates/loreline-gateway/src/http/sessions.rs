//! Session memory surface: summary, clear, preference update.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use loreline_memory::Preference;

use crate::app::AppState;
use crate::http::{internal, scope_from_headers, ErrorReply};

#[derive(Deserialize)]
pub struct NpcQuery {
    pub npc_id: Option<String>,
}

/// GET /v1/sessions/{session_id}
pub async fn summary_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<NpcQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let summary = state
        .memory
        .get_session_summary(&scope, &session_id, query.npc_id.as_deref(), 10)
        .map_err(|e| internal(e.to_string()))?;
    let preference = state
        .memory
        .get_preference(&scope, &session_id)
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({
        "summary": summary,
        "preference": preference,
    })))
}

/// DELETE /v1/sessions/{session_id}?npc_id=...
pub async fn clear_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<NpcQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    state
        .memory
        .clear_session(&scope, &session_id, query.npc_id.as_deref())
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({"cleared": true, "session_id": session_id})))
}

/// PUT /v1/sessions/{session_id}/preference
///
/// The body carries user choices only (verbosity, tone, interest tags);
/// the typed shape keeps factual claims out of preference memory.
pub async fn preference_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(update): Json<Preference>,
) -> Result<Json<Preference>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let merged = state
        .memory
        .update_preference(&scope, &session_id, &update)
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(merged))
}
