//! Transport seam between the resilient client and the tool service.
//!
//! The local transport composes in-process with the executor; the HTTP
//! transport speaks the `/tools/call` RPC with correlation headers. The
//! policy layer (timeout, retries, cache) is transport-agnostic.

use std::sync::Arc;

use async_trait::async_trait;
use loreline_core::ToolContext;
use serde_json::Value;
use thiserror::Error;

use loreline_tools::{ToolCallRequest, ToolCallResponse, ToolExecutor};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call(
        &self,
        tool_name: &str,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<ToolCallResponse, TransportError>;
}

/// In-process transport: calls the executor directly.
pub struct LocalTransport {
    executor: Arc<ToolExecutor>,
}

impl LocalTransport {
    pub fn new(executor: Arc<ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ToolTransport for LocalTransport {
    async fn call(
        &self,
        tool_name: &str,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<ToolCallResponse, TransportError> {
        Ok(self
            .executor
            .execute(&ToolCallRequest {
                tool_name: tool_name.to_string(),
                input,
                context: ctx.clone(),
            })
            .await)
    }
}

/// Cross-service transport: `POST {base}/tools/call` with the standard
/// correlation headers.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    internal_api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, internal_api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            internal_api_key,
        }
    }

    fn headers(&self, ctx: &ToolContext) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-Tenant-ID", ctx.tenant_id.clone()),
            ("X-Site-ID", ctx.site_id.clone()),
            ("X-Trace-ID", ctx.trace_id.clone()),
        ];
        if let Some(v) = &ctx.span_id {
            headers.push(("X-Span-ID", v.clone()));
        }
        if let Some(v) = &ctx.user_id {
            headers.push(("X-User-ID", v.clone()));
        }
        if let Some(v) = &ctx.session_id {
            headers.push(("X-Session-ID", v.clone()));
        }
        if let Some(v) = &ctx.npc_id {
            headers.push(("X-NPC-ID", v.clone()));
        }
        if let Some(v) = &self.internal_api_key {
            headers.push(("X-Internal-API-Key", v.clone()));
        }
        headers
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn call(
        &self,
        tool_name: &str,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<ToolCallResponse, TransportError> {
        let url = format!("{}/tools/call", self.base_url);
        let mut req = self.client.post(&url).json(&ToolCallRequest {
            tool_name: tool_name.to_string(),
            input,
            context: ctx.clone(),
        });
        for (name, value) in self.headers(ctx) {
            req = req.header(name, value);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TransportError::Protocol(format!(
                "tool RPC returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}
