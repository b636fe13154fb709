//! Versioned policy documents.
//!
//! The engine versions whole documents, not fields. At most one version of
//! a document is active; rollback is re-activation of an older version.

use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::db::init_db;
use crate::error::{ControlError, Result};

pub const EVIDENCE_GATE_POLICY: &str = "evidence-gate";
pub const ALERT_RULES_POLICY: &str = "alert-rules";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub content: Value,
    pub operator: String,
    pub is_active: bool,
    pub created_at: String,
}

pub struct PolicyStore {
    db: Mutex<Connection>,
}

impl PolicyStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Active document for `name`. When none exists the built-in seed for
    /// that name (if any) is imported and activated first.
    pub fn get_active(&self, name: &str) -> Result<Option<PolicyVersion>> {
        if let Some(active) = self.query_active(name)? {
            return Ok(Some(active));
        }
        if let Some((version, description, content)) = seed_document(name) {
            info!(policy = name, version, "importing seed policy");
            self.create_version(name, &version, Some(&description), &content, "seed", true)?;
            return self.query_active(name);
        }
        Ok(None)
    }

    fn query_active(&self, name: &str) -> Result<Option<PolicyVersion>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT name, version, description, content, operator, is_active, created_at
                 FROM policy_versions WHERE name = ?1 AND is_active = 1",
                [name],
                row_to_policy,
            )
            .ok())
    }

    pub fn get_version(&self, name: &str, version: &str) -> Result<Option<PolicyVersion>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT name, version, description, content, operator, is_active, created_at
                 FROM policy_versions WHERE name = ?1 AND version = ?2",
                [name, version],
                row_to_policy,
            )
            .ok())
    }

    pub fn list_versions(&self, name: &str) -> Result<Vec<PolicyVersion>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT name, version, description, content, operator, is_active, created_at
             FROM policy_versions WHERE name = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([name], row_to_policy)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Insert a new version; `(name, version)` must be unique. When
    /// `activate` is set, the new version atomically becomes the only
    /// active one.
    pub fn create_version(
        &self,
        name: &str,
        version: &str,
        description: Option<&str>,
        content: &Value,
        operator: &str,
        activate: bool,
    ) -> Result<PolicyVersion> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        if activate {
            tx.execute(
                "UPDATE policy_versions SET is_active = 0 WHERE name = ?1",
                [name],
            )?;
        }
        let created_at = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO policy_versions
             (name, version, description, content, operator, is_active, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            rusqlite::params![
                name,
                version,
                description,
                serde_json::to_string(content)?,
                operator,
                activate as i64,
                created_at,
            ],
        )?;
        tx.commit()?;
        info!(policy = name, version, activate, "policy version created");

        Ok(PolicyVersion {
            name: name.to_string(),
            version: version.to_string(),
            description: description.map(String::from),
            content: content.clone(),
            operator: operator.to_string(),
            is_active: activate,
            created_at,
        })
    }

    /// Make `version` the single active document for `name`. Rollback is
    /// exactly this call with an older version.
    pub fn set_active(&self, name: &str, version: &str) -> Result<PolicyVersion> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let n = tx.execute(
            "UPDATE policy_versions SET is_active = 1 WHERE name = ?1 AND version = ?2",
            [name, version],
        )?;
        if n == 0 {
            return Err(ControlError::NotFound {
                entity: "policy version".to_string(),
                id: format!("{}/{}", name, version),
            });
        }
        tx.execute(
            "UPDATE policy_versions SET is_active = 0 WHERE name = ?1 AND version != ?2",
            [name, version],
        )?;
        tx.commit()?;
        info!(policy = name, version, "policy version activated");
        drop(db);

        self.get_version(name, version)?.ok_or(ControlError::NotFound {
            entity: "policy version".to_string(),
            id: format!("{}/{}", name, version),
        })
    }
}

/// Built-in seed documents, imported on first read when the table is empty
/// for a given name.
fn seed_document(name: &str) -> Option<(String, String, Value)> {
    match name {
        EVIDENCE_GATE_POLICY => Some((
            "v1.0".to_string(),
            "default evidence gate policy".to_string(),
            json!({
                "default_policy": {
                    "min_citations": 1,
                    "min_score": 0.3,
                    "max_soft_claims": 2,
                    "strict_mode": false
                },
                "site_policies": {},
                "npc_policies": {},
                "intent_overrides": {}
            }),
        )),
        ALERT_RULES_POLICY => Some((
            "v1.0".to_string(),
            "default alert rules".to_string(),
            json!({
                "rules": [
                    {
                        "code": "llm_fallback_rate_high",
                        "name": "LLM fallback rate high",
                        "category": "llm",
                        "severity": "critical",
                        "metric": "fallback_rate",
                        "condition": ">",
                        "threshold": 0.3,
                        "unit": "ratio",
                        "window": "15m",
                        "recommended_actions": ["check LLM provider status", "verify credentials"]
                    },
                    {
                        "code": "success_rate_low",
                        "name": "Turn success rate low",
                        "category": "runtime",
                        "severity": "critical",
                        "metric": "success_rate",
                        "condition": "<",
                        "threshold": 0.9,
                        "unit": "ratio",
                        "window": "15m",
                        "recommended_actions": ["inspect recent error traces"]
                    },
                    {
                        "code": "conservative_rate_high",
                        "name": "Conservative rate high",
                        "category": "guardrail",
                        "severity": "high",
                        "metric": "conservative_rate",
                        "condition": ">",
                        "threshold": 0.5,
                        "unit": "ratio",
                        "window": "15m",
                        "recommended_actions": ["review evidence coverage", "check retrieval health"]
                    },
                    {
                        "code": "citation_rate_low",
                        "name": "Citation rate low",
                        "category": "retrieval",
                        "severity": "medium",
                        "metric": "citation_rate",
                        "condition": "<",
                        "threshold": 0.3,
                        "unit": "ratio",
                        "window": "1h",
                        "recommended_actions": ["check vector index", "expand evidence corpus"]
                    },
                    {
                        "code": "latency_high",
                        "name": "Average latency high",
                        "category": "runtime",
                        "severity": "high",
                        "metric": "avg_latency_ms",
                        "condition": ">",
                        "threshold": 3000.0,
                        "unit": "ms",
                        "window": "15m",
                        "recommended_actions": ["check LLM latency", "check retrieval latency"]
                    }
                ]
            }),
        )),
        _ => None,
    }
}

fn row_to_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<PolicyVersion> {
    let content_json: String = row.get(3)?;
    Ok(PolicyVersion {
        name: row.get(0)?,
        version: row.get(1)?,
        description: row.get(2)?,
        content: serde_json::from_str(&content_json).unwrap_or(Value::Null),
        operator: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PolicyStore {
        PolicyStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn first_read_imports_seed() {
        let store = store();
        let active = store.get_active(EVIDENCE_GATE_POLICY).unwrap().unwrap();
        assert_eq!(active.version, "v1.0");
        assert!(active.is_active);
        assert_eq!(active.content["default_policy"]["min_citations"], 1);
    }

    #[test]
    fn set_active_is_exclusive() {
        let store = store();
        store
            .create_version(EVIDENCE_GATE_POLICY, "v1.0", None, &json!({}), "op", true)
            .unwrap();
        store
            .create_version(EVIDENCE_GATE_POLICY, "v1.1", None, &json!({"x": 1}), "op", true)
            .unwrap();
        assert_eq!(
            store.get_active(EVIDENCE_GATE_POLICY).unwrap().unwrap().version,
            "v1.1"
        );

        // Rollback is re-activation.
        store.set_active(EVIDENCE_GATE_POLICY, "v1.0").unwrap();
        assert_eq!(
            store.get_active(EVIDENCE_GATE_POLICY).unwrap().unwrap().version,
            "v1.0"
        );

        let versions = store.list_versions(EVIDENCE_GATE_POLICY).unwrap();
        assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
    }

    #[test]
    fn set_active_unknown_version_errors() {
        let store = store();
        assert!(matches!(
            store.set_active(EVIDENCE_GATE_POLICY, "v9.9"),
            Err(ControlError::NotFound { .. })
        ));
    }
}
