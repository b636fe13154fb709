//! Release management: create, activate, rollback, history.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use loreline_control::ControlError;

use crate::app::AppState;
use crate::http::{bad_request, internal, not_found, scope_from_headers, ErrorReply};

#[derive(Deserialize)]
pub struct CreateReleaseRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub payload: Value,
    #[serde(default = "default_operator")]
    pub created_by: String,
}

fn default_operator() -> String {
    "admin".to_string()
}

fn map_control_error(e: ControlError) -> ErrorReply {
    match e {
        ControlError::NotFound { .. } => not_found(e.to_string()),
        ControlError::Invalid { .. } => bad_request(e.to_string()),
        other => internal(other.to_string()),
    }
}

/// POST /v1/releases
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateReleaseRequest>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let release = state
        .releases
        .create(
            &scope,
            &request.name,
            request.description.as_deref(),
            request.payload,
            &request.created_by,
        )
        .map_err(map_control_error)?;
    Ok(Json(json!(release)))
}

/// GET /v1/releases/active
pub async fn active_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let release = state
        .releases
        .get_active(&scope)
        .map_err(map_control_error)?
        .ok_or_else(|| not_found("no active release"))?;
    Ok(Json(json!(release)))
}

#[derive(Deserialize)]
pub struct OperatorQuery {
    #[serde(default = "default_operator")]
    pub operator: String,
}

/// POST /v1/releases/{id}/activate
pub async fn activate_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<OperatorQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let release = state
        .releases
        .activate(&id, &query.operator)
        .map_err(map_control_error)?;
    Ok(Json(json!(release)))
}

/// POST /v1/releases/{id}/rollback
pub async fn rollback_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<OperatorQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let release = state
        .releases
        .rollback(&id, &query.operator)
        .map_err(map_control_error)?;
    Ok(Json(json!(release)))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

/// GET /v1/releases/history
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let history = state
        .releases
        .history(&scope, query.limit)
        .map_err(map_control_error)?;
    Ok(Json(json!({"items": history, "total": history.len()})))
}
