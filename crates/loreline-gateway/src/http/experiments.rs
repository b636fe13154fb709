//! Experiment management and stable bucket assignment.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use loreline_control::{ControlError, Variant};

use crate::app::AppState;
use crate::http::{bad_request, internal, not_found, scope_from_headers, ErrorReply};

fn map_control_error(e: ControlError) -> ErrorReply {
    match e {
        ControlError::NotFound { .. } => not_found(e.to_string()),
        ControlError::Invalid { .. } => bad_request(e.to_string()),
        other => internal(other.to_string()),
    }
}

#[derive(Deserialize)]
pub struct CreateExperimentRequest {
    pub name: String,
    #[serde(default = "default_subject_type")]
    pub subject_type: String,
    pub variants: Vec<Variant>,
}

fn default_subject_type() -> String {
    "session_id".to_string()
}

/// POST /v1/experiments
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateExperimentRequest>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let experiment = state
        .experiments
        .create(&scope, &request.name, &request.subject_type, request.variants)
        .map_err(map_control_error)?;
    Ok(Json(json!(experiment)))
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

/// PATCH /v1/experiments/{id}/status
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Value>, ErrorReply> {
    let experiment = state
        .experiments
        .set_status(&id, &request.status)
        .map_err(map_control_error)?;
    Ok(Json(json!(experiment)))
}

/// GET /v1/experiments/active
pub async fn active_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let experiments = state
        .experiments
        .list_active(&scope)
        .map_err(map_control_error)?;
    Ok(Json(json!({"items": experiments, "total": experiments.len()})))
}

#[derive(Deserialize)]
pub struct AssignQuery {
    pub experiment_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

/// GET /v1/experiments/assign
///
/// The subject key prefers `session_id`, falling back to `user_id`.
pub async fn assign_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssignQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let subject_key = query
        .session_id
        .filter(|s| !s.is_empty())
        .or(query.user_id.filter(|s| !s.is_empty()))
        .ok_or_else(|| bad_request("session_id or user_id is required"))?;
    let assignment = state
        .experiments
        .assign(&query.experiment_id, &subject_key)
        .map_err(map_control_error)?;
    Ok(Json(json!(assignment)))
}

#[derive(Deserialize)]
pub struct AbSummaryQuery {
    pub experiment_id: String,
    #[serde(default = "default_range")]
    pub range: String,
}

fn default_range() -> String {
    "24h".to_string()
}

/// GET /v1/experiments/ab-summary
pub async fn ab_summary_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AbSummaryQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let summary = state
        .ledger
        .ab_summary(&scope, &query.experiment_id, &query.range)
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({
        "experiment_id": query.experiment_id,
        "range": query.range,
        "variants": summary,
    })))
}
