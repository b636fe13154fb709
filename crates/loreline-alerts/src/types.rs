use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One alert rule as stored in the versioned rules document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub code: String,
    pub name: String,
    pub category: String,
    pub severity: String,
    pub metric: String,
    pub condition: String,
    pub threshold: f64,
    pub unit: String,
    #[serde(default = "default_window")]
    pub window: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
}

fn default_window() -> String {
    "15m".to_string()
}

impl AlertRule {
    /// Compare a metric value against the threshold.
    pub fn fires(&self, value: f64) -> bool {
        match self.condition.as_str() {
            ">" => value > self.threshold,
            "<" => value < self.threshold,
            ">=" => value >= self.threshold,
            "<=" => value <= self.threshold,
            "==" => (value - self.threshold).abs() < f64::EPSILON,
            other => {
                tracing::warn!(condition = other, code = %self.code, "unknown condition");
                false
            }
        }
    }
}

/// A rule that fired in the current evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub code: String,
    pub name: String,
    pub severity: String,
    pub metric: String,
    pub condition: String,
    pub threshold: f64,
    pub current_value: f64,
    pub unit: String,
    pub window: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
}

/// Persisted firing/resolved state, deduplicated by
/// `tenant|site|alert_code|window`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    pub alert_code: String,
    pub severity: String,
    pub status: String,
    pub window: String,
    pub current_value: f64,
    pub threshold: f64,
    pub condition: String,
    pub unit: String,
    pub dedup_key: String,
    pub first_seen_at: String,
    pub last_seen_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_sent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_sent_at: Option<String>,
    #[serde(default)]
    pub context: Value,
}

/// Time-bounded alert suppression with optional code/severity matchers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSilence {
    pub id: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    pub starts_at: String,
    pub ends_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

impl AlertSilence {
    pub fn matches(&self, code: &str, severity: &str, now: &DateTime<Utc>) -> bool {
        let in_window = self
            .starts_at
            .parse::<DateTime<Utc>>()
            .is_ok_and(|s| s <= *now)
            && self
                .ends_at
                .parse::<DateTime<Utc>>()
                .is_ok_and(|e| e >= *now);
        if !in_window {
            return false;
        }
        if let Some(c) = &self.alert_code {
            if c != code {
                return false;
            }
        }
        if let Some(s) = &self.severity {
            if s != severity {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(condition: &str, threshold: f64) -> AlertRule {
        AlertRule {
            code: "c".to_string(),
            name: "n".to_string(),
            category: "cat".to_string(),
            severity: "high".to_string(),
            metric: "m".to_string(),
            condition: condition.to_string(),
            threshold,
            unit: "ratio".to_string(),
            window: "15m".to_string(),
            recommended_actions: vec![],
        }
    }

    #[test]
    fn conditions_compare_correctly() {
        assert!(rule(">", 0.5).fires(0.6));
        assert!(!rule(">", 0.5).fires(0.5));
        assert!(rule(">=", 0.5).fires(0.5));
        assert!(rule("<", 0.5).fires(0.4));
        assert!(rule("<=", 0.5).fires(0.5));
        assert!(rule("==", 0.5).fires(0.5));
        assert!(!rule("~=", 0.5).fires(0.5));
    }

    #[test]
    fn silence_matching_respects_window_and_matchers() {
        let now = Utc::now();
        let silence = AlertSilence {
            id: "s1".to_string(),
            tenant_id: "t1".to_string(),
            site_id: None,
            alert_code: Some("latency_high".to_string()),
            severity: None,
            starts_at: (now - chrono::Duration::hours(1)).to_rfc3339(),
            ends_at: (now + chrono::Duration::hours(1)).to_rfc3339(),
            reason: None,
            created_by: "op".to_string(),
            created_at: now.to_rfc3339(),
        };
        assert!(silence.matches("latency_high", "high", &now));
        assert!(!silence.matches("other_code", "high", &now));

        let expired = AlertSilence {
            ends_at: (now - chrono::Duration::minutes(1)).to_rfc3339(),
            ..silence
        };
        assert!(!expired.matches("latency_high", "high", &now));
    }
}
