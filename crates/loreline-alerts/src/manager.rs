//! Alert lifecycle management on top of the evaluator.
//!
//! Firing alerts are deduplicated by `tenant|site|alert_code|window`: a
//! continuously-firing condition notifies once per episode. Silences split
//! evaluation output into active vs silenced, and webhook dispatch runs
//! only for newly-firing critical/high alerts.

use std::sync::Arc;

use chrono::Utc;
use loreline_control::{ExperimentStore, ReleaseStore};
use loreline_core::Scope;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::evaluator::AlertsEvaluator;
use crate::store::AlertStore;
use crate::types::{Alert, AlertEvent};

pub fn dedup_key(tenant_id: &str, site_id: Option<&str>, alert_code: &str, window: &str) -> String {
    format!(
        "{}|{}|{}|{}",
        tenant_id,
        site_id.unwrap_or("all"),
        alert_code,
        window
    )
}

#[derive(Debug)]
pub struct EvaluationOutcome {
    pub snapshot: loreline_ledger::MetricsSnapshot,
    pub new_events: Vec<AlertEvent>,
    pub updated_events: Vec<AlertEvent>,
    pub resolved_events: Vec<AlertEvent>,
    pub silenced: Vec<Alert>,
    pub webhook_sent: bool,
}

pub struct AlertsManager {
    evaluator: AlertsEvaluator,
    store: Arc<AlertStore>,
    releases: Arc<ReleaseStore>,
    experiments: Arc<ExperimentStore>,
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl AlertsManager {
    pub fn new(
        evaluator: AlertsEvaluator,
        store: Arc<AlertStore>,
        releases: Arc<ReleaseStore>,
        experiments: Arc<ExperimentStore>,
        webhook_url: Option<String>,
    ) -> Self {
        Self {
            evaluator,
            store,
            releases,
            experiments,
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub fn evaluator(&self) -> &AlertsEvaluator {
        &self.evaluator
    }

    /// Full evaluation pass for one scope: evaluate, silence, reconcile,
    /// notify.
    pub async fn evaluate_and_persist(
        &self,
        scope: &Scope,
        window: &str,
        send_webhook: bool,
    ) -> Result<EvaluationOutcome> {
        let now = Utc::now();
        info!(scope = %scope, window, "alert evaluation start");

        // 1-2. Evaluate rules.
        let (alerts, snapshot) = self
            .evaluator
            .evaluate(&scope.tenant_id, Some(&scope.site_id), window)?;

        // 3. Apply silences.
        let silences = self
            .store
            .active_silences(&scope.tenant_id, Some(&scope.site_id))?;
        let (active, silenced): (Vec<Alert>, Vec<Alert>) = alerts
            .into_iter()
            .partition(|a| !silences.iter().any(|s| s.matches(&a.code, &a.severity, &now)));

        // 4. Context snapshot: active release and experiment.
        let context = self.context(scope, &snapshot);

        // 5. Reconcile with stored events.
        let existing = self.store.firing_events(scope, window)?;
        let now_str = now.to_rfc3339();

        let mut new_events = Vec::new();
        let mut updated_events = Vec::new();
        for alert in &active {
            match existing.iter().find(|e| e.alert_code == alert.code) {
                Some(event) => {
                    self.store
                        .touch_event(&event.id, alert.current_value, &now_str, &context)?;
                    let mut updated = event.clone();
                    updated.current_value = alert.current_value;
                    updated.last_seen_at = now_str.clone();
                    updated_events.push(updated);
                }
                None => {
                    let event = AlertEvent {
                        id: Uuid::new_v4().to_string(),
                        tenant_id: scope.tenant_id.clone(),
                        site_id: Some(scope.site_id.clone()),
                        alert_code: alert.code.clone(),
                        severity: alert.severity.clone(),
                        status: "firing".to_string(),
                        window: window.to_string(),
                        current_value: alert.current_value,
                        threshold: alert.threshold,
                        condition: alert.condition.clone(),
                        unit: alert.unit.clone(),
                        dedup_key: dedup_key(
                            &scope.tenant_id,
                            Some(&scope.site_id),
                            &alert.code,
                            window,
                        ),
                        first_seen_at: now_str.clone(),
                        last_seen_at: now_str.clone(),
                        resolved_at: None,
                        webhook_sent: None,
                        webhook_sent_at: None,
                        context: merge_context(&context, &alert.recommended_actions),
                    };
                    self.store.insert_event(&event)?;
                    new_events.push(event);
                }
            }
        }

        let mut resolved_events = Vec::new();
        for event in existing {
            if !active.iter().any(|a| a.code == event.alert_code) {
                self.store.resolve_event(&event.id, &now_str)?;
                let mut resolved = event;
                resolved.status = "resolved".to_string();
                resolved.resolved_at = Some(now_str.clone());
                resolved_events.push(resolved);
            }
        }

        // 6. Webhook for newly-firing critical/high only.
        let webhook_sent = if send_webhook && !new_events.is_empty() {
            self.dispatch_webhook(scope, &new_events, &context).await?
        } else {
            false
        };

        info!(
            scope = %scope,
            new = new_events.len(),
            updated = updated_events.len(),
            resolved = resolved_events.len(),
            silenced = silenced.len(),
            webhook_sent,
            "alert evaluation complete"
        );

        Ok(EvaluationOutcome {
            snapshot,
            new_events,
            updated_events,
            resolved_events,
            silenced,
            webhook_sent,
        })
    }

    fn context(&self, scope: &Scope, snapshot: &loreline_ledger::MetricsSnapshot) -> Value {
        let mut context = json!({
            "metrics_snapshot": snapshot,
        });
        match self.releases.get_active(scope) {
            Ok(Some(release)) => {
                context["active_release_id"] = json!(release.id);
                context["active_release_name"] = json!(release.name);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "active release lookup failed"),
        }
        match self.experiments.list_active(scope) {
            Ok(experiments) => {
                if let Some(experiment) = experiments.first() {
                    context["active_experiment_id"] = json!(experiment.id);
                    context["active_experiment_name"] = json!(experiment.name);
                }
            }
            Err(e) => warn!(error = %e, "active experiment lookup failed"),
        }
        context
    }

    /// Send one webhook covering the critical/high subset of the new
    /// events; stamp each event with the outcome.
    async fn dispatch_webhook(
        &self,
        scope: &Scope,
        new_events: &[AlertEvent],
        context: &Value,
    ) -> Result<bool> {
        let Some(url) = &self.webhook_url else {
            return Ok(false);
        };

        let notifiable: Vec<&AlertEvent> = new_events
            .iter()
            .filter(|e| matches!(e.severity.as_str(), "critical" | "high"))
            .collect();
        if notifiable.is_empty() {
            for event in new_events {
                self.store.stamp_webhook(&event.id, "skipped", None)?;
            }
            return Ok(true);
        }

        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "tenant_id": scope.tenant_id,
            "site_id": scope.site_id,
            "alert_count": notifiable.len(),
            "alerts": notifiable.iter().map(|e| json!({
                "code": e.alert_code,
                "severity": e.severity,
                "current_value": e.current_value,
                "threshold": e.threshold,
                "condition": e.condition,
                "unit": e.unit,
                "first_seen_at": e.first_seen_at,
            })).collect::<Vec<_>>(),
            "context": {
                "active_release_id": context.get("active_release_id"),
                "active_release_name": context.get("active_release_name"),
                "active_experiment_id": context.get("active_experiment_id"),
                "active_experiment_name": context.get("active_experiment_name"),
            },
        });

        let now = Utc::now().to_rfc3339();
        match self.http.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                for event in &notifiable {
                    self.store.stamp_webhook(&event.id, "sent", Some(&now))?;
                }
                info!(alert_count = notifiable.len(), "alert webhook sent");
                Ok(true)
            }
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "alert webhook rejected");
                for event in &notifiable {
                    self.store.stamp_webhook(&event.id, "failed", None)?;
                }
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "alert webhook failed");
                for event in &notifiable {
                    self.store.stamp_webhook(&event.id, "failed", None)?;
                }
                Ok(false)
            }
        }
    }
}

fn merge_context(context: &Value, recommended_actions: &[String]) -> Value {
    let mut merged = context.clone();
    merged["recommended_actions"] = json!(recommended_actions);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use loreline_control::PolicyStore;
    use loreline_ledger::{TraceRecord, TraceStore};
    use rusqlite::Connection;

    fn manager(ledger: Arc<TraceStore>) -> AlertsManager {
        let policies = Arc::new(PolicyStore::new(Connection::open_in_memory().unwrap()).unwrap());
        AlertsManager::new(
            AlertsEvaluator::new(policies, ledger),
            Arc::new(AlertStore::new(Connection::open_in_memory().unwrap()).unwrap()),
            Arc::new(ReleaseStore::new(Connection::open_in_memory().unwrap()).unwrap()),
            Arc::new(ExperimentStore::new(Connection::open_in_memory().unwrap()).unwrap()),
            None,
        )
    }

    fn seed_turns(ledger: &TraceStore, conservative: usize, normal: usize) {
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
            r.evidence_ids = vec!["e1".to_string()];
            r.latency_ms = Some(100);
            ledger.upsert(&r).unwrap();
        }
    }

    #[tokio::test]
    async fn firing_alert_dedups_across_evaluations() {
        let ledger = Arc::new(TraceStore::new(Connection::open_in_memory().unwrap()).unwrap());
        seed_turns(&ledger, 9, 1);
        let manager = manager(ledger);
        let scope = Scope::new("t1", "s1");

        let first = manager.evaluate_and_persist(&scope, "15m", false).await.unwrap();
        assert!(first
            .new_events
            .iter()
            .any(|e| e.alert_code == "conservative_rate_high"));
        assert_eq!(
            first.new_events[0].dedup_key,
            dedup_key("t1", Some("s1"), &first.new_events[0].alert_code, "15m")
        );

        // Still firing: updated, not re-created.
        let second = manager.evaluate_and_persist(&scope, "15m", false).await.unwrap();
        assert!(second.new_events.is_empty());
        assert!(!second.updated_events.is_empty());
    }

    #[tokio::test]
    async fn resolved_when_condition_clears() {
        let ledger = Arc::new(TraceStore::new(Connection::open_in_memory().unwrap()).unwrap());
        seed_turns(&ledger, 9, 1);
        let manager = manager(ledger.clone());
        let scope = Scope::new("t1", "s1");
        manager.evaluate_and_persist(&scope, "15m", false).await.unwrap();

        // Flip the window to healthy traffic.
        seed_turns(&ledger, 0, 200);
        let outcome = manager.evaluate_and_persist(&scope, "15m", false).await.unwrap();
        assert!(outcome
            .resolved_events
            .iter()
            .any(|e| e.alert_code == "conservative_rate_high"));
    }

    #[tokio::test]
    async fn silence_splits_alerts() {
        let ledger = Arc::new(TraceStore::new(Connection::open_in_memory().unwrap()).unwrap());
        seed_turns(&ledger, 9, 1);
        let manager = manager(ledger);
        let scope = Scope::new("t1", "s1");
        let now = Utc::now();
        manager
            .store()
            .create_silence(
                "t1",
                None,
                Some("conservative_rate_high"),
                None,
                &(now - Duration::hours(1)).to_rfc3339(),
                &(now + Duration::hours(1)).to_rfc3339(),
                Some("maintenance"),
                "op",
            )
            .unwrap();

        let outcome = manager.evaluate_and_persist(&scope, "15m", false).await.unwrap();
        assert!(outcome
            .silenced
            .iter()
            .any(|a| a.code == "conservative_rate_high"));
        assert!(!outcome
            .new_events
            .iter()
            .any(|e| e.alert_code == "conservative_rate_high"));
    }
}
