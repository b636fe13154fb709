//! Alert surface: rules, on-demand evaluation, events, silences.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use loreline_alerts::AlertError;

use crate::app::AppState;
use crate::http::{internal, not_found, scope_from_headers, ErrorReply};

fn map_alert_error(e: AlertError) -> ErrorReply {
    match e {
        AlertError::NotFound { .. } => not_found(e.to_string()),
        other => internal(other.to_string()),
    }
}

/// GET /v1/alerts/rules
pub async fn rules_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ErrorReply> {
    let rules = state
        .alerts
        .evaluator()
        .load_rules()
        .map_err(map_alert_error)?;
    Ok(Json(json!({"items": rules, "total": rules.len()})))
}

#[derive(Deserialize)]
pub struct EvaluateQuery {
    #[serde(default = "default_window")]
    pub window: String,
    #[serde(default)]
    pub send_webhook: bool,
}

fn default_window() -> String {
    "15m".to_string()
}

/// GET /v1/alerts/evaluate: run one evaluation pass now.
pub async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<EvaluateQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let outcome = state
        .alerts
        .evaluate_and_persist(&scope, &query.window, query.send_webhook)
        .await
        .map_err(map_alert_error)?;
    Ok(Json(json!({
        "metrics_snapshot": outcome.snapshot,
        "new_alerts": outcome.new_events,
        "updated_alerts": outcome.updated_events,
        "resolved_alerts": outcome.resolved_events,
        "silenced_alerts": outcome.silenced,
        "webhook_sent": outcome.webhook_sent,
    })))
}

/// GET /v1/alerts/summary: firing/resolved counts plus current metrics.
pub async fn summary_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<EvaluateQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let firing = state
        .alerts
        .store()
        .list_events(&scope, Some("firing"), 100)
        .map_err(map_alert_error)?;
    let metrics = state
        .ledger
        .metrics(&scope.tenant_id, Some(&scope.site_id), &query.window)
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({
        "firing_count": firing.len(),
        "firing": firing,
        "metrics_snapshot": metrics,
    })))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /v1/alerts/events
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let events = state
        .alerts
        .store()
        .list_events(&scope, query.status.as_deref(), query.limit)
        .map_err(map_alert_error)?;
    Ok(Json(json!({"items": events, "total": events.len()})))
}

/// GET /v1/alerts/silences
pub async fn list_silences_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let silences = state
        .alerts
        .store()
        .list_silences(&scope.tenant_id, 100)
        .map_err(map_alert_error)?;
    Ok(Json(json!({"items": silences, "total": silences.len()})))
}

#[derive(Deserialize)]
pub struct CreateSilenceRequest {
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub alert_code: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_operator")]
    pub created_by: String,
}

fn default_operator() -> String {
    "admin".to_string()
}

/// POST /v1/alerts/silences
pub async fn create_silence_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateSilenceRequest>,
) -> Result<Json<Value>, ErrorReply> {
    let scope = scope_from_headers(&headers)?;
    let silence = state
        .alerts
        .store()
        .create_silence(
            &scope.tenant_id,
            request.site_id.as_deref(),
            request.alert_code.as_deref(),
            request.severity.as_deref(),
            &request.starts_at,
            &request.ends_at,
            request.reason.as_deref(),
            &request.created_by,
        )
        .map_err(map_alert_error)?;
    Ok(Json(json!(silence)))
}

/// DELETE /v1/alerts/silences/{id}
pub async fn delete_silence_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ErrorReply> {
    state
        .alerts
        .store()
        .delete_silence(&id)
        .map_err(map_alert_error)?;
    Ok(Json(json!({"deleted": true, "id": id})))
}
