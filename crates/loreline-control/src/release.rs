//! Release packages: versioned bundles of control-plane choices.
//!
//! Lifecycle: draft → active → archived. Activation and rollback run in a
//! transaction over the `(tenant, site)` rows so exactly one release is
//! active at commit, and every transition writes a history row.

use std::sync::Mutex;

use chrono::Utc;
use loreline_core::Scope;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub tenant_id: String,
    pub site_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    pub payload: Value,
    pub created_by: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseHistoryRow {
    pub id: String,
    pub release_id: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_release_id: Option<String>,
    pub operator: String,
    pub created_at: String,
}

/// Accessors for the known payload keys.
pub mod payload {
    use serde_json::Value;

    const KNOWN_KEYS: [&str; 5] = [
        "evidence_gate_policy_version",
        "feedback_routing_policy_version",
        "prompts_active_map",
        "experiment_id",
        "retrieval_defaults",
    ];

    pub fn validate(payload: &Value) -> bool {
        payload
            .as_object()
            .is_some_and(|map| KNOWN_KEYS.iter().any(|k| map.contains_key(*k)))
    }

    pub fn policy_version(payload: &Value) -> Option<&str> {
        payload.get("evidence_gate_policy_version")?.as_str()
    }

    pub fn experiment_id(payload: &Value) -> Option<&str> {
        payload.get("experiment_id")?.as_str()
    }

    pub fn prompt_version<'a>(payload: &'a Value, npc_id: &str) -> Option<&'a str> {
        payload.get("prompts_active_map")?.get(npc_id)?.as_str()
    }

    pub fn retrieval_defaults(payload: &Value) -> Option<&Value> {
        payload.get("retrieval_defaults")
    }
}

pub struct ReleaseStore {
    db: Mutex<Connection>,
}

impl ReleaseStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn create(
        &self,
        scope: &Scope,
        name: &str,
        description: Option<&str>,
        payload_value: Value,
        created_by: &str,
    ) -> Result<Release> {
        if !payload::validate(&payload_value) {
            return Err(ControlError::Invalid {
                entity: "release payload".to_string(),
                reason: "must contain at least one known config key".to_string(),
            });
        }

        let release = Release {
            id: Uuid::new_v4().to_string(),
            tenant_id: scope.tenant_id.clone(),
            site_id: scope.site_id.clone(),
            name: name.to_string(),
            description: description.map(String::from),
            status: "draft".to_string(),
            payload: payload_value,
            created_by: created_by.to_string(),
            created_at: Utc::now().to_rfc3339(),
            activated_at: None,
            archived_at: None,
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO releases
             (id, tenant_id, site_id, name, description, status, payload,
              created_by, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            rusqlite::params![
                release.id,
                release.tenant_id,
                release.site_id,
                release.name,
                release.description,
                release.status,
                serde_json::to_string(&release.payload)?,
                release.created_by,
                release.created_at,
            ],
        )?;
        info!(release_id = %release.id, scope = %scope, "release created");
        Ok(release)
    }

    pub fn get(&self, release_id: &str) -> Result<Option<Release>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                &format!("{} WHERE id = ?1", SELECT),
                [release_id],
                row_to_release,
            )
            .ok())
    }

    pub fn get_active(&self, scope: &Scope) -> Result<Option<Release>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                &format!(
                    "{} WHERE tenant_id = ?1 AND site_id = ?2 AND status = 'active'",
                    SELECT
                ),
                rusqlite::params![scope.tenant_id, scope.site_id],
                row_to_release,
            )
            .ok())
    }

    pub fn list(&self, scope: &Scope, limit: usize) -> Result<Vec<Release>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{} WHERE tenant_id = ?1 AND site_id = ?2
             ORDER BY created_at DESC LIMIT ?3",
            SELECT
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![scope.tenant_id, scope.site_id, limit as i64],
                row_to_release,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn activate(&self, release_id: &str, operator: &str) -> Result<Release> {
        self.transition(release_id, operator, "activate")
    }

    pub fn rollback(&self, release_id: &str, operator: &str) -> Result<Release> {
        self.transition(release_id, operator, "rollback")
    }

    /// Archive the current active release (if different), activate the
    /// target, and write one history row. All inside one transaction.
    fn transition(&self, release_id: &str, operator: &str, action: &str) -> Result<Release> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let now = Utc::now().to_rfc3339();

        let target = tx
            .query_row(
                &format!("{} WHERE id = ?1", SELECT),
                [release_id],
                row_to_release,
            )
            .map_err(|_| ControlError::NotFound {
                entity: "release".to_string(),
                id: release_id.to_string(),
            })?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT id FROM releases
                 WHERE tenant_id = ?1 AND site_id = ?2 AND status = 'active'",
                rusqlite::params![target.tenant_id, target.site_id],
                |row| row.get(0),
            )
            .ok();

        if previous.as_deref() == Some(release_id) && action == "activate" {
            tx.commit()?;
            info!(release_id, "release already active");
            drop(db);
            return self.get(release_id)?.ok_or(ControlError::NotFound {
                entity: "release".to_string(),
                id: release_id.to_string(),
            });
        }

        if let Some(prev) = &previous {
            if prev != release_id {
                tx.execute(
                    "UPDATE releases SET status = 'archived', archived_at = ?1 WHERE id = ?2",
                    rusqlite::params![now, prev],
                )?;
            }
        }
        tx.execute(
            "UPDATE releases SET status = 'active', activated_at = ?1, archived_at = NULL
             WHERE id = ?2",
            rusqlite::params![now, release_id],
        )?;
        tx.execute(
            "INSERT INTO release_history
             (id, release_id, tenant_id, site_id, action, previous_release_id,
              operator, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                release_id,
                target.tenant_id,
                target.site_id,
                action,
                previous,
                operator,
                now,
            ],
        )?;
        tx.commit()?;
        info!(release_id, action, "release transition committed");
        drop(db);

        self.get(release_id)?.ok_or(ControlError::NotFound {
            entity: "release".to_string(),
            id: release_id.to_string(),
        })
    }

    pub fn history(&self, scope: &Scope, limit: usize) -> Result<Vec<ReleaseHistoryRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, release_id, action, previous_release_id, operator, created_at
             FROM release_history
             WHERE tenant_id = ?1 AND site_id = ?2
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![scope.tenant_id, scope.site_id, limit as i64],
                |row| {
                    Ok(ReleaseHistoryRow {
                        id: row.get(0)?,
                        release_id: row.get(1)?,
                        action: row.get(2)?,
                        previous_release_id: row.get(3)?,
                        operator: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

const SELECT: &str =
    "SELECT id, tenant_id, site_id, name, description, status, payload,
            created_by, created_at, activated_at, archived_at
     FROM releases";

fn row_to_release(row: &rusqlite::Row<'_>) -> rusqlite::Result<Release> {
    let payload_json: String = row.get(6)?;
    Ok(Release {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        site_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
        created_by: row.get(7)?,
        created_at: row.get(8)?,
        activated_at: row.get(9)?,
        archived_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ReleaseStore {
        ReleaseStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn scope() -> Scope {
        Scope::new("t1", "s1")
    }

    #[test]
    fn invalid_payload_is_rejected() {
        let store = store();
        let err = store.create(&scope(), "r", None, json!({"unrelated": 1}), "op");
        assert!(matches!(err, Err(ControlError::Invalid { .. })));
    }

    #[test]
    fn activate_then_rollback_keeps_single_active_and_history() {
        let store = store();
        let scope = scope();
        let r1 = store
            .create(&scope, "r1", None, json!({"evidence_gate_policy_version": "v1.0"}), "op")
            .unwrap();
        let r2 = store
            .create(&scope, "r2", None, json!({"evidence_gate_policy_version": "v1.1"}), "op")
            .unwrap();

        store.activate(&r1.id, "op").unwrap();
        assert_eq!(store.get_active(&scope).unwrap().unwrap().id, r1.id);

        store.activate(&r2.id, "op").unwrap();
        let active = store.get_active(&scope).unwrap().unwrap();
        assert_eq!(active.id, r2.id);
        assert_eq!(store.get(&r1.id).unwrap().unwrap().status, "archived");

        store.rollback(&r1.id, "op").unwrap();
        assert_eq!(store.get_active(&scope).unwrap().unwrap().id, r1.id);

        let history = store.history(&scope, 10).unwrap();
        let actions: Vec<&str> = history.iter().rev().map(|h| h.action.as_str()).collect();
        assert_eq!(actions, vec!["activate", "activate", "rollback"]);
        assert_eq!(history[0].previous_release_id.as_deref(), Some(r2.id.as_str()));
    }

    #[test]
    fn activating_active_release_is_a_no_op() {
        let store = store();
        let scope = scope();
        let r1 = store
            .create(&scope, "r1", None, json!({"experiment_id": "e1"}), "op")
            .unwrap();
        store.activate(&r1.id, "op").unwrap();
        store.activate(&r1.id, "op").unwrap();
        assert_eq!(store.history(&scope, 10).unwrap().len(), 1);
    }
}
