pub mod alerts;
pub mod chat;
pub mod experiments;
pub mod health;
pub mod policies;
pub mod releases;
pub mod sessions;
pub mod tools;
pub mod traces;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use loreline_core::Scope;
use serde::Serialize;

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

pub type ErrorReply = (StatusCode, Json<ApiError>);

pub fn bad_request(message: impl Into<String>) -> ErrorReply {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: message.into(),
            code: "VALIDATION_ERROR".to_string(),
        }),
    )
}

pub fn not_found(message: impl Into<String>) -> ErrorReply {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            error: message.into(),
            code: "NOT_FOUND".to_string(),
        }),
    )
}

pub fn internal(message: impl Into<String>) -> ErrorReply {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            error: message.into(),
            code: "INTERNAL_ERROR".to_string(),
        }),
    )
}

pub fn unauthorized() -> ErrorReply {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError {
            error: "missing or invalid X-Internal-API-Key".to_string(),
            code: "UNAUTHORIZED".to_string(),
        }),
    )
}

/// Scoped endpoints require the tenant/site correlation headers.
pub fn scope_from_headers(headers: &HeaderMap) -> Result<Scope, ErrorReply> {
    let tenant = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_request("X-Tenant-ID header is required"))?;
    let site = headers
        .get("x-site-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_request("X-Site-ID header is required"))?;
    Ok(Scope::new(tenant, site))
}
