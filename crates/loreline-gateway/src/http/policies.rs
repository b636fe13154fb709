//! Evidence-gate policy management.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use loreline_control::{ControlError, EVIDENCE_GATE_POLICY};

use crate::app::AppState;
use crate::http::{bad_request, internal, not_found, ErrorReply};

/// GET /v1/policies/evidence-gate/active
pub async fn active_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ErrorReply> {
    let policy = state
        .policies
        .get_active(EVIDENCE_GATE_POLICY)
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("no active evidence-gate policy"))?;
    Ok(Json(json!(policy)))
}

/// GET /v1/policies/evidence-gate/versions
pub async fn versions_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ErrorReply> {
    let versions = state
        .policies
        .list_versions(EVIDENCE_GATE_POLICY)
        .map_err(|e| internal(e.to_string()))?;
    let items: Vec<Value> = versions
        .iter()
        .map(|p| {
            json!({
                "version": p.version,
                "created_at": p.created_at,
                "operator": p.operator,
                "is_active": p.is_active,
            })
        })
        .collect();
    Ok(Json(json!({"items": items, "total": items.len()})))
}

#[derive(Deserialize)]
pub struct CreatePolicyRequest {
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub content: Value,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default = "bool_true")]
    pub activate: bool,
}

fn default_operator() -> String {
    "admin".to_string()
}

fn bool_true() -> bool {
    true
}

/// POST /v1/policies/evidence-gate
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePolicyRequest>,
) -> Result<Json<Value>, ErrorReply> {
    let policy = state
        .policies
        .create_version(
            EVIDENCE_GATE_POLICY,
            &request.version,
            request.description.as_deref(),
            &request.content,
            &request.operator,
            request.activate,
        )
        .map_err(|e| match e {
            ControlError::Database(inner) => bad_request(format!("version conflict: {}", inner)),
            other => internal(other.to_string()),
        })?;
    Ok(Json(json!(policy)))
}

/// POST /v1/policies/evidence-gate/rollback/{version}
pub async fn rollback_handler(
    State(state): State<Arc<AppState>>,
    Path(version): Path<String>,
) -> Result<Json<Value>, ErrorReply> {
    let policy = state
        .policies
        .set_active(EVIDENCE_GATE_POLICY, &version)
        .map_err(|e| match e {
            ControlError::NotFound { .. } => not_found(e.to_string()),
            other => internal(other.to_string()),
        })?;
    Ok(Json(json!(policy)))
}

/// POST /v1/policies/evidence-gate/export: the active document verbatim.
pub async fn export_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ErrorReply> {
    let policy = state
        .policies
        .get_active(EVIDENCE_GATE_POLICY)
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("no active evidence-gate policy"))?;
    Ok(Json(json!({
        "name": policy.name,
        "version": policy.version,
        "content": policy.content,
        "exported_at": chrono::Utc::now().to_rfc3339(),
    })))
}
