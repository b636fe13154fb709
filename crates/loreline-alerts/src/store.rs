use std::sync::Mutex;

use chrono::Utc;
use loreline_core::Scope;
use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{AlertError, Result};
use crate::types::{AlertEvent, AlertSilence};

/// Persistence for alert events and silences.
pub struct AlertStore {
    db: Mutex<Connection>,
}

impl AlertStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn insert_event(&self, event: &AlertEvent) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO alerts_events
             (id, tenant_id, site_id, alert_code, severity, status, window,
              current_value, threshold, condition, unit, dedup_key,
              first_seen_at, last_seen_at, resolved_at, webhook_sent,
              webhook_sent_at, context)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            rusqlite::params![
                event.id,
                event.tenant_id,
                event.site_id,
                event.alert_code,
                event.severity,
                event.status,
                event.window,
                event.current_value,
                event.threshold,
                event.condition,
                event.unit,
                event.dedup_key,
                event.first_seen_at,
                event.last_seen_at,
                event.resolved_at,
                event.webhook_sent,
                event.webhook_sent_at,
                serde_json::to_string(&event.context)?,
            ],
        )?;
        Ok(())
    }

    /// Refresh a still-firing event.
    pub fn touch_event(&self, id: &str, current_value: f64, last_seen_at: &str, context: &Value) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE alerts_events
             SET current_value = ?1, last_seen_at = ?2, context = ?3
             WHERE id = ?4",
            rusqlite::params![current_value, last_seen_at, serde_json::to_string(context)?, id],
        )?;
        Ok(())
    }

    pub fn resolve_event(&self, id: &str, resolved_at: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE alerts_events SET status = 'resolved', resolved_at = ?1 WHERE id = ?2",
            rusqlite::params![resolved_at, id],
        )?;
        Ok(())
    }

    pub fn stamp_webhook(&self, id: &str, result: &str, sent_at: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE alerts_events SET webhook_sent = ?1, webhook_sent_at = ?2 WHERE id = ?3",
            rusqlite::params![result, sent_at, id],
        )?;
        Ok(())
    }

    /// Currently-firing events for one scope and window.
    pub fn firing_events(&self, scope: &Scope, window: &str) -> Result<Vec<AlertEvent>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{} WHERE tenant_id = ?1 AND site_id = ?2 AND window = ?3 AND status = 'firing'",
            SELECT_EVENT
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![scope.tenant_id, scope.site_id, window],
                row_to_event,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn list_events(
        &self,
        scope: &Scope,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AlertEvent>> {
        let db = self.db.lock().unwrap();
        let rows = match status {
            Some(status) => {
                let mut stmt = db.prepare(&format!(
                    "{} WHERE tenant_id = ?1 AND site_id = ?2 AND status = ?3
                     ORDER BY last_seen_at DESC LIMIT ?4",
                    SELECT_EVENT
                ))?;
                let rows: Vec<AlertEvent> = stmt
                    .query_map(
                        rusqlite::params![scope.tenant_id, scope.site_id, status, limit as i64],
                        row_to_event,
                    )?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "{} WHERE tenant_id = ?1 AND site_id = ?2
                     ORDER BY last_seen_at DESC LIMIT ?3",
                    SELECT_EVENT
                ))?;
                let rows: Vec<AlertEvent> = stmt
                    .query_map(
                        rusqlite::params![scope.tenant_id, scope.site_id, limit as i64],
                        row_to_event,
                    )?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            }
        };
        Ok(rows)
    }

    // --- silences ----------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_silence(
        &self,
        tenant_id: &str,
        site_id: Option<&str>,
        alert_code: Option<&str>,
        severity: Option<&str>,
        starts_at: &str,
        ends_at: &str,
        reason: Option<&str>,
        created_by: &str,
    ) -> Result<AlertSilence> {
        let silence = AlertSilence {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            site_id: site_id.map(String::from),
            alert_code: alert_code.map(String::from),
            severity: severity.map(String::from),
            starts_at: starts_at.to_string(),
            ends_at: ends_at.to_string(),
            reason: reason.map(String::from),
            created_by: created_by.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO alerts_silences
             (id, tenant_id, site_id, alert_code, severity, starts_at, ends_at,
              reason, created_by, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            rusqlite::params![
                silence.id,
                silence.tenant_id,
                silence.site_id,
                silence.alert_code,
                silence.severity,
                silence.starts_at,
                silence.ends_at,
                silence.reason,
                silence.created_by,
                silence.created_at,
            ],
        )?;
        Ok(silence)
    }

    pub fn delete_silence(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM alerts_silences WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(AlertError::NotFound {
                entity: "silence".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Silences in effect now for a tenant; site-specific silences only
    /// apply to their site, site-less ones apply tenant-wide.
    pub fn active_silences(&self, tenant_id: &str, site_id: Option<&str>) -> Result<Vec<AlertSilence>> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, site_id, alert_code, severity, starts_at,
                    ends_at, reason, created_by, created_at
             FROM alerts_silences
             WHERE tenant_id = ?1 AND starts_at <= ?2 AND ends_at >= ?2",
        )?;
        let rows: Vec<AlertSilence> = stmt
            .query_map(rusqlite::params![tenant_id, now], row_to_silence)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows
            .into_iter()
            .filter(|s| s.site_id.is_none() || s.site_id.as_deref() == site_id)
            .collect())
    }

    pub fn list_silences(&self, tenant_id: &str, limit: usize) -> Result<Vec<AlertSilence>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, site_id, alert_code, severity, starts_at,
                    ends_at, reason, created_by, created_at
             FROM alerts_silences
             WHERE tenant_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![tenant_id, limit as i64], row_to_silence)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

const SELECT_EVENT: &str =
    "SELECT id, tenant_id, site_id, alert_code, severity, status, window,
            current_value, threshold, condition, unit, dedup_key,
            first_seen_at, last_seen_at, resolved_at, webhook_sent,
            webhook_sent_at, context
     FROM alerts_events";

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertEvent> {
    let context_json: String = row.get(17)?;
    Ok(AlertEvent {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        site_id: row.get(2)?,
        alert_code: row.get(3)?,
        severity: row.get(4)?,
        status: row.get(5)?,
        window: row.get(6)?,
        current_value: row.get(7)?,
        threshold: row.get(8)?,
        condition: row.get(9)?,
        unit: row.get(10)?,
        dedup_key: row.get(11)?,
        first_seen_at: row.get(12)?,
        last_seen_at: row.get(13)?,
        resolved_at: row.get(14)?,
        webhook_sent: row.get(15)?,
        webhook_sent_at: row.get(16)?,
        context: serde_json::from_str(&context_json).unwrap_or(Value::Null),
    })
}

fn row_to_silence(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertSilence> {
    Ok(AlertSilence {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        site_id: row.get(2)?,
        alert_code: row.get(3)?,
        severity: row.get(4)?,
        starts_at: row.get(5)?,
        ends_at: row.get(6)?,
        reason: row.get(7)?,
        created_by: row.get(8)?,
        created_at: row.get(9)?,
    })
}
