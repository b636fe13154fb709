//! Rule evaluation against the ledger's windowed metrics.

use std::sync::Arc;

use loreline_control::{PolicyStore, ALERT_RULES_POLICY};
use loreline_ledger::{MetricsSnapshot, TraceStore};
use tracing::debug;

use crate::error::Result;
use crate::types::{Alert, AlertRule};

pub struct AlertsEvaluator {
    policies: Arc<PolicyStore>,
    ledger: Arc<TraceStore>,
}

impl AlertsEvaluator {
    pub fn new(policies: Arc<PolicyStore>, ledger: Arc<TraceStore>) -> Self {
        Self { policies, ledger }
    }

    /// Rules from the active `alert-rules` policy document.
    pub fn load_rules(&self) -> Result<Vec<AlertRule>> {
        let Some(policy) = self.policies.get_active(ALERT_RULES_POLICY)? else {
            return Ok(Vec::new());
        };
        let rules = policy
            .content
            .get("rules")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        Ok(rules)
    }

    /// Evaluate every rule for one scope. Each rule reads the metric inside
    /// its own window (falling back to the evaluation window when unset).
    pub fn evaluate(
        &self,
        tenant_id: &str,
        site_id: Option<&str>,
        window: &str,
    ) -> Result<(Vec<Alert>, MetricsSnapshot)> {
        let rules = self.load_rules()?;
        let snapshot = self.ledger.metrics(tenant_id, site_id, window)?;

        let mut firing = Vec::new();
        for rule in rules {
            let rule_snapshot = if rule.window == window {
                snapshot.clone()
            } else {
                self.ledger.metrics(tenant_id, site_id, &rule.window)?
            };
            let Some(value) = metric_value(&rule_snapshot, &rule.metric) else {
                debug!(metric = %rule.metric, code = %rule.code, "unknown metric, skipping rule");
                continue;
            };
            // No traffic in the window means nothing to alert on.
            if rule_snapshot.total_turns == 0 {
                continue;
            }
            if rule.fires(value) {
                firing.push(Alert {
                    code: rule.code,
                    name: rule.name,
                    severity: rule.severity,
                    metric: rule.metric,
                    condition: rule.condition,
                    threshold: rule.threshold,
                    current_value: value,
                    unit: rule.unit,
                    window: rule.window,
                    recommended_actions: rule.recommended_actions,
                });
            }
        }
        Ok((firing, snapshot))
    }
}

fn metric_value(snapshot: &MetricsSnapshot, metric: &str) -> Option<f64> {
    match metric {
        "total_turns" => Some(snapshot.total_turns as f64),
        "success_rate" => Some(snapshot.success_rate),
        "error_rate" => Some(snapshot.error_rate),
        "fallback_rate" => Some(snapshot.fallback_rate),
        "conservative_rate" => Some(snapshot.conservative_rate),
        "citation_rate" => Some(snapshot.citation_rate),
        "avg_latency_ms" => Some(snapshot.avg_latency_ms),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loreline_ledger::TraceRecord;
    use rusqlite::Connection;

    fn evaluator() -> AlertsEvaluator {
        AlertsEvaluator::new(
            Arc::new(PolicyStore::new(Connection::open_in_memory().unwrap()).unwrap()),
            Arc::new(TraceStore::new(Connection::open_in_memory().unwrap()).unwrap()),
        )
    }

    fn seed_conservative_turns(ledger: &TraceStore, conservative: usize, normal: usize) {
        for i in 0..(conservative + normal) {
            let mut r = TraceRecord::begin(
                format!("trace-{}", i),
                "t1",
                "s1",
                "npc_chat",
                Utc::now().to_rfc3339(),
            );
            r.status = "success".to_string();
            r.policy_mode = if i < conservative {
                "conservative".to_string()
            } else {
                "normal".to_string()
            };
            r.latency_ms = Some(100);
            ledger.upsert(&r).unwrap();
        }
    }

    #[test]
    fn seed_rules_load() {
        let e = evaluator();
        let rules = e.load_rules().unwrap();
        assert!(rules.iter().any(|r| r.code == "conservative_rate_high"));
    }

    #[test]
    fn high_conservative_rate_fires() {
        let policies = Arc::new(PolicyStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let ledger = Arc::new(TraceStore::new(Connection::open_in_memory().unwrap()).unwrap());
        seed_conservative_turns(&ledger, 8, 2);

        let e = AlertsEvaluator::new(policies, ledger);
        let (alerts, snapshot) = e.evaluate("t1", Some("s1"), "15m").unwrap();
        assert_eq!(snapshot.total_turns, 10);
        assert!(alerts.iter().any(|a| a.code == "conservative_rate_high"));
    }

    #[test]
    fn empty_window_fires_nothing() {
        let e = evaluator();
        let (alerts, _) = e.evaluate("t1", Some("s1"), "15m").unwrap();
        assert!(alerts.is_empty());
    }
}
