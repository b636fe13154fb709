//! The resilient tool client: per-tool timeout, bounded retries with
//! exponential backoff, read-through caching for safe read tools, and a
//! per-request audit buffer that the dialog runtime flushes into the trace.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use loreline_cache::{Cache, CacheKeyBuilder};
use loreline_core::ToolContext;
use loreline_ledger::ToolCallEntry;
use serde_json::{json, Value};
use tracing::{info, warn};

use loreline_evidence::RetrievalOutput;
use loreline_tools::{ContentItem, NpcProfileView, PromptInfo};

use crate::config::{tool_config, ToolConfig, ToolPriority};
use crate::transport::ToolTransport;

/// Client-side outcome of one tool call.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub cache_hit: bool,
}

impl ToolCallResult {
    fn failure(error: String, error_type: Option<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            error_type,
            cache_hit: false,
        }
    }
}

/// One audit entry per client call, kept until the runtime drains them.
#[derive(Debug, Clone)]
pub struct ToolCallAudit {
    pub tool_name: String,
    pub status: String,
    pub latency_ms: i64,
    pub retries: u32,
    pub cache_hit: bool,
    pub error: Option<String>,
}

impl From<&ToolCallAudit> for ToolCallEntry {
    fn from(a: &ToolCallAudit) -> Self {
        ToolCallEntry {
            name: a.tool_name.clone(),
            status: a.status.clone(),
            latency_ms: a.latency_ms,
            retry_count: a.retries,
            cache_hit: a.cache_hit,
            error: a.error.clone(),
            details: None,
        }
    }
}

pub struct ResilientToolClient {
    transport: Arc<dyn ToolTransport>,
    cache: Arc<Cache>,
    keys: CacheKeyBuilder,
    audits: Mutex<Vec<ToolCallAudit>>,
}

impl ResilientToolClient {
    pub fn new(transport: Arc<dyn ToolTransport>, cache: Arc<Cache>, keys: CacheKeyBuilder) -> Self {
        Self {
            transport,
            cache,
            keys,
            audits: Mutex::new(Vec::new()),
        }
    }

    pub fn priority(tool_name: &str) -> ToolPriority {
        tool_config(tool_name).priority
    }

    /// Drain the audit buffer into trace entries.
    pub fn drain_audits(&self) -> Vec<ToolCallEntry> {
        let audits = std::mem::take(&mut *self.audits.lock().unwrap());
        audits.iter().map(ToolCallEntry::from).collect()
    }

    fn record_audit(&self, audit: ToolCallAudit) {
        self.audits.lock().unwrap().push(audit);
    }

    fn cache_key(&self, tool_name: &str, ctx: &ToolContext, input: &Value) -> Option<String> {
        let scope = ctx.scope();
        match tool_name {
            "get_npc_profile" => {
                let npc_id = input.get("npc_id")?.as_str()?;
                Some(self.keys.npc_profile(&scope, npc_id))
            }
            "get_prompt_active" => {
                let npc_id = input.get("npc_id")?.as_str()?;
                let prompt_type = input
                    .get("prompt_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("system");
                Some(
                    self.keys
                        .prompt_active(&scope, &format!("{}:{}", npc_id, prompt_type)),
                )
            }
            "get_site_map" => Some(self.keys.site_map(&scope)),
            "retrieve_evidence" => {
                let query = input.get("query")?.as_str()?;
                let domains: Option<Vec<String>> = input
                    .get("domains")
                    .and_then(|v| serde_json::from_value(v.clone()).ok());
                Some(self.keys.evidence(&scope, query, domains.as_deref()))
            }
            _ => None,
        }
    }

    /// Call a tool under its configured policy.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        input: Value,
        ctx: &ToolContext,
    ) -> ToolCallResult {
        let config: ToolConfig = tool_config(tool_name);
        let start = Instant::now();

        // 1. Cache read.
        let cache_key = if config.cacheable {
            self.cache_key(tool_name, ctx, &input)
        } else {
            None
        };
        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get(key).await {
                let latency_ms = start.elapsed().as_millis() as i64;
                info!(trace_id = %ctx.trace_id, tool_name, latency_ms, "tool cache hit");
                self.record_audit(ToolCallAudit {
                    tool_name: tool_name.to_string(),
                    status: "cache_hit".to_string(),
                    latency_ms,
                    retries: 0,
                    cache_hit: true,
                    error: None,
                });
                return ToolCallResult {
                    success: true,
                    output: Some(cached),
                    error: None,
                    error_type: None,
                    cache_hit: true,
                };
            }
        }

        // 2. Attempts with timeout and exponential backoff.
        let mut last_error: Option<(String, Option<String>)> = None;
        let mut retries = 0u32;
        for attempt in 0..=config.max_retries {
            let call = self.transport.call(tool_name, input.clone(), ctx);
            match tokio::time::timeout(config.timeout, call).await {
                Ok(Ok(resp)) if resp.success => {
                    let latency_ms = start.elapsed().as_millis() as i64;

                    // 3. Cache write.
                    if let (Some(key), Some(output)) = (&cache_key, &resp.output) {
                        self.cache.set(key, output.clone(), config.cache_ttl).await;
                    }

                    info!(trace_id = %ctx.trace_id, tool_name, latency_ms, retries, "tool call success");
                    self.record_audit(ToolCallAudit {
                        tool_name: tool_name.to_string(),
                        status: "success".to_string(),
                        latency_ms,
                        retries,
                        cache_hit: false,
                        error: None,
                    });
                    return ToolCallResult {
                        success: true,
                        output: resp.output,
                        error: None,
                        error_type: None,
                        cache_hit: false,
                    };
                }
                Ok(Ok(resp)) => {
                    // Validation and not-found failures never retry.
                    let retryable = !matches!(
                        resp.error_type.as_deref(),
                        Some("ValidationError") | Some("ToolNotFound") | Some("NotFound")
                    );
                    warn!(
                        trace_id = %ctx.trace_id,
                        tool_name,
                        error = resp.error.as_deref().unwrap_or("unknown"),
                        attempt,
                        "tool returned failure"
                    );
                    last_error = Some((
                        resp.error.unwrap_or_else(|| "tool failure".to_string()),
                        resp.error_type,
                    ));
                    if !retryable {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    warn!(trace_id = %ctx.trace_id, tool_name, error = %e, attempt, "transport error");
                    last_error = Some((e.to_string(), Some("transport".to_string())));
                }
                Err(_) => {
                    warn!(
                        trace_id = %ctx.trace_id,
                        tool_name,
                        timeout_ms = config.timeout.as_millis() as u64,
                        attempt,
                        "tool call timed out"
                    );
                    last_error = Some((
                        format!("timeout after {}ms", config.timeout.as_millis()),
                        Some("timeout".to_string()),
                    ));
                }
            }

            if attempt < config.max_retries {
                tokio::time::sleep(config.retry_delay * 2u32.pow(attempt)).await;
                retries = attempt + 1;
            }
        }

        // 4. Exhausted.
        let latency_ms = start.elapsed().as_millis() as i64;
        let (error, error_type) =
            last_error.unwrap_or_else(|| ("tool failure".to_string(), None));
        let status = if error_type.as_deref() == Some("timeout") {
            "timeout"
        } else {
            "error"
        };
        self.record_audit(ToolCallAudit {
            tool_name: tool_name.to_string(),
            status: status.to_string(),
            latency_ms,
            retries,
            cache_hit: false,
            error: Some(error.clone()),
        });
        ToolCallResult::failure(error, error_type)
    }

    // --- typed convenience wrappers ---------------------------------------

    pub async fn get_npc_profile(
        &self,
        npc_id: &str,
        ctx: &ToolContext,
        version: Option<i64>,
    ) -> Option<NpcProfileView> {
        let mut input = json!({"npc_id": npc_id});
        if let Some(v) = version {
            input["version"] = json!(v);
        }
        let result = self.call_tool("get_npc_profile", input, ctx).await;
        result
            .output
            .and_then(|o| serde_json::from_value(o).ok())
    }

    pub async fn get_prompt_active(
        &self,
        npc_id: &str,
        ctx: &ToolContext,
        prompt_type: &str,
    ) -> Option<PromptInfo> {
        let result = self
            .call_tool(
                "get_prompt_active",
                json!({"npc_id": npc_id, "prompt_type": prompt_type}),
                ctx,
            )
            .await;
        result
            .output
            .and_then(|o| serde_json::from_value(o).ok())
    }

    /// Never fails: tool-level failure degrades to an empty output with a
    /// fallback reason. `strategy` overrides the deployment default (used
    /// by experiment variants).
    pub async fn retrieve_evidence(
        &self,
        query: &str,
        ctx: &ToolContext,
        domains: Option<&[String]>,
        limit: usize,
        strategy: Option<&str>,
    ) -> RetrievalOutput {
        let mut input = json!({"query": query, "limit": limit});
        if let Some(domains) = domains {
            input["domains"] = json!(domains);
        }
        if let Some(strategy) = strategy {
            input["strategy"] = json!(strategy);
        }
        let result = self.call_tool("retrieve_evidence", input, ctx).await;
        match result.output.and_then(|o| serde_json::from_value(o).ok()) {
            Some(output) => output,
            None => RetrievalOutput::empty(
                query,
                "unavailable",
                Some(
                    result
                        .error
                        .map(|e| format!("tool_unavailable: {}", e))
                        .unwrap_or_else(|| "tool_unavailable".to_string()),
                ),
            ),
        }
    }

    pub async fn search_content(
        &self,
        query: &str,
        ctx: &ToolContext,
        limit: usize,
    ) -> Vec<ContentItem> {
        let result = self
            .call_tool("search_content", json!({"query": query, "limit": limit}), ctx)
            .await;
        result
            .output
            .and_then(|o| o.get("items").cloned())
            .and_then(|items| serde_json::from_value(items).ok())
            .unwrap_or_default()
    }

    /// Fire-and-forget analytics. Failures are swallowed after logging.
    pub async fn log_user_event(
        &self,
        event_type: &str,
        event_data: Value,
        ctx: &ToolContext,
    ) -> bool {
        let result = self
            .call_tool(
                "log_user_event",
                json!({"event_type": event_type, "event_data": event_data}),
                ctx,
            )
            .await;
        if !result.success {
            warn!(trace_id = %ctx.trace_id, event_type, "log_user_event failed");
        }
        result.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ToolTransport, TransportError};
    use async_trait::async_trait;
    use loreline_tools::{ToolAudit, ToolCallResponse};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport that fails `fail_times` before succeeding.
    struct FlakyTransport {
        calls: AtomicU32,
        fail_times: u32,
    }

    impl FlakyTransport {
        fn new(fail_times: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_times,
            }
        }
    }

    #[async_trait]
    impl ToolTransport for FlakyTransport {
        async fn call(
            &self,
            tool_name: &str,
            _input: Value,
            ctx: &ToolContext,
        ) -> Result<ToolCallResponse, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(TransportError::Network("connection refused".to_string()));
            }
            Ok(ToolCallResponse {
                success: true,
                output: Some(json!({"npc_id": "ancestor", "version": 1, "active": true,
                                    "name": "yan", "npc_type": "ancestor", "persona": {},
                                    "call": n})),
                error: None,
                error_type: None,
                audit: ToolAudit {
                    trace_id: ctx.trace_id.clone(),
                    tool_name: tool_name.to_string(),
                    status: "success".to_string(),
                    latency_ms: 1,
                    request_payload_hash: "0000000000000000".to_string(),
                    error_type: None,
                    error_message: None,
                },
            })
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            tenant_id: "t1".to_string(),
            site_id: "s1".to_string(),
            trace_id: "trace-test".to_string(),
            span_id: None,
            user_id: None,
            session_id: None,
            npc_id: None,
        }
    }

    fn client(transport: Arc<dyn ToolTransport>) -> ResilientToolClient {
        ResilientToolClient::new(transport, Arc::new(Cache::in_memory()), CacheKeyBuilder::default())
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let client = client(Arc::new(FlakyTransport::new(1)));
        let result = client
            .call_tool("get_npc_profile", json!({"npc_id": "ancestor"}), &ctx())
            .await;
        assert!(result.success);
        let audits = client.drain_audits();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].retry_count, 1);
        assert_eq!(audits[0].status, "success");
    }

    #[tokio::test]
    async fn second_call_hits_cache() {
        let client = client(Arc::new(FlakyTransport::new(0)));
        let ctx = ctx();
        let first = client
            .call_tool("get_npc_profile", json!({"npc_id": "ancestor"}), &ctx)
            .await;
        assert!(first.success && !first.cache_hit);

        let second = client
            .call_tool("get_npc_profile", json!({"npc_id": "ancestor"}), &ctx)
            .await;
        assert!(second.cache_hit);
        // Cached output is the first call's output.
        assert_eq!(second.output.unwrap()["call"], json!(0));

        let audits = client.drain_audits();
        assert_eq!(audits[1].status, "cache_hit");
        assert!(audits[1].cache_hit);
    }

    #[tokio::test]
    async fn zero_retry_tool_fails_fast() {
        let client = client(Arc::new(FlakyTransport::new(10)));
        let result = client
            .call_tool("log_user_event", json!({"event_type": "x", "event_data": {}}), &ctx())
            .await;
        assert!(!result.success);
        let audits = client.drain_audits();
        assert_eq!(audits[0].retry_count, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_report_error() {
        let client = client(Arc::new(FlakyTransport::new(10)));
        let result = client
            .call_tool("search_content", json!({"query": "q"}), &ctx())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("connection refused"));
    }
}
