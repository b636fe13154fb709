//! Tool RPC surface: POST /tools/list and /tools/call.
//!
//! `success = false` on a call is still HTTP 200; only protocol problems
//! (bad JSON, missing auth) answer non-200.

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use loreline_tools::{ToolCallRequest, ToolCallResponse};

use crate::app::AppState;
use crate::http::{unauthorized, ErrorReply};

fn check_internal_key(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.config.gateway.internal_api_key {
        None => true,
        Some(expected) => headers
            .get("x-internal-api-key")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false),
    }
}

/// POST /tools/list
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorReply> {
    if !check_internal_key(&state, &headers) {
        return Err(unauthorized());
    }
    let tools = state.executor.registry().list();
    Ok(Json(json!({
        "tools": tools,
        "total": tools.len(),
    })))
}

/// POST /tools/call
pub async fn call_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ToolCallRequest>,
) -> Result<Json<ToolCallResponse>, ErrorReply> {
    if !check_internal_key(&state, &headers) {
        return Err(unauthorized());
    }
    Ok(Json(state.executor.execute(&request).await))
}
