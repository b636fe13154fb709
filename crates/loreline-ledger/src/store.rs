use std::sync::Mutex;

use chrono::{Duration, Utc};
use loreline_core::Scope;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::debug;

use crate::db::init_db;
use crate::error::Result;
use crate::types::{MetricsSnapshot, ToolCallEntry, TraceFilter, TraceRecord, VariantSummary};

/// Parse a rolling-window label (`"15m"`, `"1h"`, `"24h"`, `"30s"`) into a
/// duration. Unknown labels fall back to 15 minutes.
pub fn parse_window(window: &str) -> Duration {
    let (digits, unit): (String, String) = window.chars().partition(|c| c.is_ascii_digit());
    let n: i64 = digits.parse().unwrap_or(15);
    match unit.as_str() {
        "s" => Duration::seconds(n),
        "h" => Duration::hours(n),
        "d" => Duration::days(n),
        _ => Duration::minutes(n),
    }
}

/// Append-update trace ledger.
///
/// Writes are idempotent on `trace_id`: a second write updates the existing
/// row (`created_at` keeps the first write's value).
pub struct TraceStore {
    db: Mutex<Connection>,
}

impl TraceStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn upsert(&self, record: &TraceRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO trace_ledger
             (trace_id, tenant_id, site_id, session_id, npc_id, request_type,
              request_input, tool_calls, evidence_ids, policy_mode, policy_reason,
              response_output, prompt_version, prompt_source, persona_version,
              model_provider, model_name, tokens_input, tokens_output, latency_ms,
              status, error, started_at, completed_at, release_id, experiment_id,
              experiment_variant, strategy_snapshot, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,
                     ?18,?19,?20,?21,?22,?23,?24,?25,?26,?27,?28,?29)
             ON CONFLICT(trace_id) DO UPDATE SET
               session_id = excluded.session_id,
               npc_id = excluded.npc_id,
               request_type = excluded.request_type,
               request_input = excluded.request_input,
               tool_calls = excluded.tool_calls,
               evidence_ids = excluded.evidence_ids,
               policy_mode = excluded.policy_mode,
               policy_reason = excluded.policy_reason,
               response_output = excluded.response_output,
               prompt_version = excluded.prompt_version,
               prompt_source = excluded.prompt_source,
               persona_version = excluded.persona_version,
               model_provider = excluded.model_provider,
               model_name = excluded.model_name,
               tokens_input = excluded.tokens_input,
               tokens_output = excluded.tokens_output,
               latency_ms = excluded.latency_ms,
               status = excluded.status,
               error = excluded.error,
               completed_at = excluded.completed_at,
               release_id = excluded.release_id,
               experiment_id = excluded.experiment_id,
               experiment_variant = excluded.experiment_variant,
               strategy_snapshot = excluded.strategy_snapshot",
            rusqlite::params![
                record.trace_id,
                record.tenant_id,
                record.site_id,
                record.session_id,
                record.npc_id,
                record.request_type,
                serde_json::to_string(&record.request_input)?,
                serde_json::to_string(&record.tool_calls)?,
                serde_json::to_string(&record.evidence_ids)?,
                record.policy_mode,
                record.policy_reason,
                record
                    .response_output
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                record.prompt_version,
                record.prompt_source,
                record.persona_version,
                record.model_provider,
                record.model_name,
                record.tokens_input,
                record.tokens_output,
                record.latency_ms,
                record.status,
                record.error,
                record.started_at,
                record.completed_at,
                record.release_id,
                record.experiment_id,
                record.experiment_variant,
                record
                    .strategy_snapshot
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!(trace_id = %record.trace_id, status = %record.status, "trace upserted");
        Ok(())
    }

    pub fn get(&self, scope: &Scope, trace_id: &str) -> Result<Option<TraceRecord>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                &format!("{} WHERE trace_id = ?1 AND tenant_id = ?2 AND site_id = ?3", SELECT),
                rusqlite::params![trace_id, scope.tenant_id, scope.site_id],
                row_to_record,
            )
            .ok();
        Ok(row)
    }

    pub fn list(&self, scope: &Scope, filter: &TraceFilter) -> Result<Vec<TraceRecord>> {
        let mut sql = format!("{} WHERE tenant_id = ?1 AND site_id = ?2", SELECT);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(scope.tenant_id.clone()),
            Box::new(scope.site_id.clone()),
        ];

        let push = |clause: &str, value: String, params: &mut Vec<Box<dyn rusqlite::ToSql>>, sql: &mut String| {
            params.push(Box::new(value));
            sql.push_str(&format!(" AND {} = ?{}", clause, params.len()));
        };
        if let Some(v) = &filter.session_id {
            push("session_id", v.clone(), &mut params, &mut sql);
        }
        if let Some(v) = &filter.npc_id {
            push("npc_id", v.clone(), &mut params, &mut sql);
        }
        if let Some(v) = &filter.policy_mode {
            push("policy_mode", v.clone(), &mut params, &mut sql);
        }
        if let Some(v) = &filter.status {
            push("status", v.clone(), &mut params, &mut sql);
        }
        if let Some(v) = &filter.request_type {
            push("request_type", v.clone(), &mut params, &mut sql);
        }
        if let Some(v) = &filter.created_after {
            params.push(Box::new(v.clone()));
            sql.push_str(&format!(" AND created_at >= ?{}", params.len()));
        }
        if let Some(v) = &filter.created_before {
            params.push(Box::new(v.clone()));
            sql.push_str(&format!(" AND created_at <= ?{}", params.len()));
        }

        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        params.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ?{}", params.len()));

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())), row_to_record)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Distinct `(tenant, site)` pairs seen in the ledger. Drives the
    /// round-robin order of periodic evaluators.
    pub fn scopes(&self) -> Result<Vec<Scope>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT DISTINCT tenant_id, site_id FROM trace_ledger
             ORDER BY tenant_id, site_id",
        )?;
        let scopes = stmt
            .query_map([], |row| {
                Ok(Scope::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(scopes)
    }

    /// Aggregate metrics over `npc_chat` traces inside the rolling window.
    pub fn metrics(&self, tenant_id: &str, site_id: Option<&str>, window: &str) -> Result<MetricsSnapshot> {
        let since = (Utc::now() - parse_window(window)).to_rfc3339();
        let db = self.db.lock().unwrap();

        let sql = format!(
            "SELECT COUNT(*),
                    SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN model_provider = 'fallback' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN policy_mode = 'conservative' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN evidence_ids != '[]' THEN 1 ELSE 0 END),
                    COALESCE(AVG(latency_ms), 0)
             FROM trace_ledger
             WHERE tenant_id = ?1 AND request_type = 'npc_chat' AND created_at >= ?2{}",
            if site_id.is_some() { " AND site_id = ?3" } else { "" }
        );

        let (total, success, fallback, conservative, cited, avg_latency) = match site_id {
            Some(site) => db.query_row(
                &sql,
                rusqlite::params![tenant_id, since, site],
                read_metric_counts,
            )?,
            None => db.query_row(&sql, rusqlite::params![tenant_id, since], read_metric_counts)?,
        };

        let rate = |n: i64| if total > 0 { n as f64 / total as f64 } else { 0.0 };
        Ok(MetricsSnapshot {
            window: window.to_string(),
            total_turns: total,
            success_rate: rate(success),
            error_rate: rate(total - success),
            fallback_rate: rate(fallback),
            conservative_rate: rate(conservative),
            citation_rate: rate(cited),
            avg_latency_ms: avg_latency,
        })
    }

    /// Per-variant comparison for one experiment.
    pub fn ab_summary(
        &self,
        scope: &Scope,
        experiment_id: &str,
        window: &str,
    ) -> Result<Vec<VariantSummary>> {
        let since = (Utc::now() - parse_window(window)).to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT experiment_variant,
                    COUNT(*),
                    SUM(CASE WHEN policy_mode = 'conservative' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN evidence_ids != '[]' THEN 1 ELSE 0 END),
                    COALESCE(AVG(latency_ms), 0)
             FROM trace_ledger
             WHERE tenant_id = ?1 AND site_id = ?2 AND experiment_id = ?3
               AND experiment_variant IS NOT NULL AND created_at >= ?4
             GROUP BY experiment_variant
             ORDER BY experiment_variant",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![scope.tenant_id, scope.site_id, experiment_id, since],
                |row| {
                    let turns: i64 = row.get(1)?;
                    let conservative: Option<i64> = row.get(2)?;
                    let cited: Option<i64> = row.get(3)?;
                    let rate = |n: Option<i64>| {
                        if turns > 0 {
                            n.unwrap_or(0) as f64 / turns as f64
                        } else {
                            0.0
                        }
                    };
                    Ok(VariantSummary {
                        variant: row.get(0)?,
                        turns,
                        conservative_rate: rate(conservative),
                        citation_rate: rate(cited),
                        avg_latency_ms: row.get(4)?,
                    })
                },
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

/// Build the unified replay view of one trace.
pub fn to_unified(record: &TraceRecord) -> Value {
    let llm_calls: Vec<&ToolCallEntry> = record
        .tool_calls
        .iter()
        .filter(|t| t.name == "llm_generate")
        .collect();
    json!({
        "basic": {
            "trace_id": record.trace_id,
            "tenant_id": record.tenant_id,
            "site_id": record.site_id,
            "session_id": record.session_id,
            "npc_id": record.npc_id,
            "request_type": record.request_type,
            "status": record.status,
            "policy_mode": record.policy_mode,
            "policy_reason": record.policy_reason,
            "latency_ms": record.latency_ms,
            "started_at": record.started_at,
            "completed_at": record.completed_at,
        },
        "prompt": {
            "version": record.prompt_version,
            "source": record.prompt_source,
            "persona_version": record.persona_version,
        },
        "tool_calls": record.tool_calls,
        "llm": {
            "provider": record.model_provider,
            "model": record.model_name,
            "tokens_input": record.tokens_input,
            "tokens_output": record.tokens_output,
            "fallback": record.model_provider.as_deref() == Some("fallback"),
            "calls": llm_calls,
        },
        "citations": {
            "evidence_ids": record.evidence_ids,
            "items": record
                .response_output
                .as_ref()
                .and_then(|o| o.get("citations"))
                .cloned()
                .unwrap_or(Value::Array(vec![])),
        },
        "control_plane": {
            "release_id": record.release_id,
            "experiment_id": record.experiment_id,
            "experiment_variant": record.experiment_variant,
            "strategy_snapshot": record.strategy_snapshot,
        },
    })
}

fn read_metric_counts(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(i64, i64, i64, i64, i64, f64)> {
    Ok((
        row.get(0)?,
        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
        row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        row.get::<_, Option<i64>>(3)?.unwrap_or(0),
        row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        row.get(5)?,
    ))
}

const SELECT: &str =
    "SELECT trace_id, tenant_id, site_id, session_id, npc_id, request_type,
            request_input, tool_calls, evidence_ids, policy_mode, policy_reason,
            response_output, prompt_version, prompt_source, persona_version,
            model_provider, model_name, tokens_input, tokens_output, latency_ms,
            status, error, started_at, completed_at, release_id, experiment_id,
            experiment_variant, strategy_snapshot
     FROM trace_ledger";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TraceRecord> {
    let request_input: String = row.get(6)?;
    let tool_calls: String = row.get(7)?;
    let evidence_ids: String = row.get(8)?;
    let response_output: Option<String> = row.get(11)?;
    let strategy_snapshot: Option<String> = row.get(27)?;
    Ok(TraceRecord {
        trace_id: row.get(0)?,
        tenant_id: row.get(1)?,
        site_id: row.get(2)?,
        session_id: row.get(3)?,
        npc_id: row.get(4)?,
        request_type: row.get(5)?,
        request_input: serde_json::from_str(&request_input).unwrap_or(Value::Null),
        tool_calls: serde_json::from_str(&tool_calls).unwrap_or_default(),
        evidence_ids: serde_json::from_str(&evidence_ids).unwrap_or_default(),
        policy_mode: row.get(9)?,
        policy_reason: row.get(10)?,
        response_output: response_output.and_then(|s| serde_json::from_str(&s).ok()),
        prompt_version: row.get(12)?,
        prompt_source: row.get(13)?,
        persona_version: row.get(14)?,
        model_provider: row.get(15)?,
        model_name: row.get(16)?,
        tokens_input: row.get(17)?,
        tokens_output: row.get(18)?,
        latency_ms: row.get(19)?,
        status: row.get(20)?,
        error: row.get(21)?,
        started_at: row.get(22)?,
        completed_at: row.get(23)?,
        release_id: row.get(24)?,
        experiment_id: row.get(25)?,
        experiment_variant: row.get(26)?,
        strategy_snapshot: strategy_snapshot.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TraceStore {
        TraceStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn scope() -> Scope {
        Scope::new("t1", "s1")
    }

    #[test]
    fn second_write_updates_not_duplicates() {
        let store = store();
        let scope = scope();
        let mut record = TraceRecord::begin("trace-1", "t1", "s1", "npc_chat", Utc::now().to_rfc3339());
        store.upsert(&record).unwrap();

        record.status = "success".to_string();
        record.latency_ms = Some(42);
        record.completed_at = Some(Utc::now().to_rfc3339());
        store.upsert(&record).unwrap();

        let all = store.list(&scope, &TraceFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, "success");
        assert_eq!(all[0].latency_ms, Some(42));
        assert!(all[0].completed_at.as_deref() >= Some(all[0].started_at.as_str()));
    }

    #[test]
    fn get_is_scope_checked() {
        let store = store();
        let record = TraceRecord::begin("trace-1", "t1", "s1", "npc_chat", Utc::now().to_rfc3339());
        store.upsert(&record).unwrap();
        assert!(store.get(&scope(), "trace-1").unwrap().is_some());
        assert!(store.get(&Scope::new("t2", "s1"), "trace-1").unwrap().is_none());
    }

    #[test]
    fn list_filters_by_policy_mode() {
        let store = store();
        let scope = scope();
        for (id, mode) in [("trace-1", "normal"), ("trace-2", "conservative")] {
            let mut r = TraceRecord::begin(id, "t1", "s1", "npc_chat", Utc::now().to_rfc3339());
            r.policy_mode = mode.to_string();
            r.status = "success".to_string();
            store.upsert(&r).unwrap();
        }
        let filter = TraceFilter {
            policy_mode: Some("conservative".to_string()),
            ..TraceFilter::default()
        };
        let rows = store.list(&scope, &filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trace_id, "trace-2");
    }

    #[test]
    fn metrics_counts_rates() {
        let store = store();
        for (id, mode, cited) in [
            ("trace-1", "normal", true),
            ("trace-2", "conservative", false),
        ] {
            let mut r = TraceRecord::begin(id, "t1", "s1", "npc_chat", Utc::now().to_rfc3339());
            r.policy_mode = mode.to_string();
            r.status = "success".to_string();
            r.latency_ms = Some(100);
            if cited {
                r.evidence_ids = vec!["e1".to_string()];
            }
            store.upsert(&r).unwrap();
        }
        let m = store.metrics("t1", Some("s1"), "15m").unwrap();
        assert_eq!(m.total_turns, 2);
        assert_eq!(m.success_rate, 1.0);
        assert_eq!(m.conservative_rate, 0.5);
        assert_eq!(m.citation_rate, 0.5);
        assert_eq!(m.avg_latency_ms, 100.0);
    }

    #[test]
    fn window_parsing() {
        assert_eq!(parse_window("15m"), Duration::minutes(15));
        assert_eq!(parse_window("1h"), Duration::hours(1));
        assert_eq!(parse_window("30s"), Duration::seconds(30));
        assert_eq!(parse_window("bogus"), Duration::minutes(15));
    }
}
