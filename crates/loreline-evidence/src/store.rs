use std::sync::Mutex;

use chrono::Utc;
use loreline_core::Scope;
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{EvidenceError, Result};
use crate::types::EvidenceRecord;

/// Fields for a new evidence record; id and timestamps are assigned on
/// insert.
#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub source_type: String,
    pub source_ref: Option<String>,
    pub title: String,
    pub excerpt: String,
    pub confidence: f64,
    pub verified: bool,
    pub tags: Vec<String>,
    pub domains: Vec<String>,
}

/// Tenant-scoped evidence corpus.
///
/// Rows are immutable: a correction inserts a fresh record carrying
/// `supersedes`, and deletion only sets `deleted_at`.
pub struct EvidenceStore {
    db: Mutex<Connection>,
}

impl EvidenceStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn insert(&self, scope: &Scope, new: NewEvidence) -> Result<EvidenceRecord> {
        self.insert_inner(scope, new, None)
    }

    /// Create a correcting record that supersedes an existing one. The old
    /// record stays readable; consumers prefer the newest by `created_at`.
    pub fn supersede(
        &self,
        scope: &Scope,
        old_id: &str,
        new: NewEvidence,
    ) -> Result<EvidenceRecord> {
        if self.get(scope, old_id)?.is_none() {
            return Err(EvidenceError::NotFound(old_id.to_string()));
        }
        self.insert_inner(scope, new, Some(old_id.to_string()))
    }

    fn insert_inner(
        &self,
        scope: &Scope,
        new: NewEvidence,
        supersedes: Option<String>,
    ) -> Result<EvidenceRecord> {
        let record = EvidenceRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: scope.tenant_id.clone(),
            site_id: scope.site_id.clone(),
            source_type: new.source_type,
            source_ref: new.source_ref,
            title: new.title,
            excerpt: new.excerpt,
            confidence: new.confidence.clamp(0.0, 1.0),
            verified: new.verified,
            tags: new.tags,
            domains: new.domains,
            supersedes,
            created_at: Utc::now().to_rfc3339(),
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO evidences
             (id, tenant_id, site_id, source_type, source_ref, title, excerpt,
              confidence, verified, tags, domains, supersedes, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            rusqlite::params![
                record.id,
                record.tenant_id,
                record.site_id,
                record.source_type,
                record.source_ref,
                record.title,
                record.excerpt,
                record.confidence,
                record.verified as i64,
                serde_json::to_string(&record.tags)?,
                serde_json::to_string(&record.domains)?,
                record.supersedes,
                record.created_at,
            ],
        )?;
        info!(evidence_id = %record.id, scope = %scope, "evidence inserted");
        Ok(record)
    }

    pub fn get(&self, scope: &Scope, id: &str) -> Result<Option<EvidenceRecord>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT id, tenant_id, site_id, source_type, source_ref, title,
                        excerpt, confidence, verified, tags, domains, supersedes,
                        created_at
                 FROM evidences
                 WHERE id = ?1 AND tenant_id = ?2 AND site_id = ?3
                   AND deleted_at IS NULL",
                rusqlite::params![id, scope.tenant_id, scope.site_id],
                row_to_record,
            )
            .ok();
        Ok(row)
    }

    /// Soft delete: the row stays for audit, searches skip it.
    pub fn soft_delete(&self, scope: &Scope, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE evidences SET deleted_at = ?1
             WHERE id = ?2 AND tenant_id = ?3 AND site_id = ?4 AND deleted_at IS NULL",
            rusqlite::params![Utc::now().to_rfc3339(), id, scope.tenant_id, scope.site_id],
        )?;
        if n == 0 {
            return Err(EvidenceError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// All live rows for one `(tenant, site)`, optionally filtered to rows
    /// overlapping `domains`. This is the candidate set for in-process
    /// trigram scoring; corpora are curated and bounded per site.
    pub fn list_for_scope(
        &self,
        scope: &Scope,
        domains: Option<&[String]>,
    ) -> Result<Vec<EvidenceRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, site_id, source_type, source_ref, title,
                    excerpt, confidence, verified, tags, domains, supersedes,
                    created_at
             FROM evidences
             WHERE tenant_id = ?1 AND site_id = ?2 AND deleted_at IS NULL
             ORDER BY created_at",
        )?;
        let rows: Vec<EvidenceRecord> = stmt
            .query_map(
                rusqlite::params![scope.tenant_id, scope.site_id],
                row_to_record,
            )?
            .filter_map(|r| r.ok())
            .collect();

        Ok(match domains {
            Some(filter) if !filter.is_empty() => rows
                .into_iter()
                .filter(|r| {
                    r.domains.iter().any(|d| filter.contains(d))
                        || r.tags.iter().any(|t| filter.contains(t))
                })
                .collect(),
            _ => rows,
        })
    }

    /// Distinct `(tenant, site)` pairs with live evidence. Drives the
    /// round-robin order of the backfill worker.
    pub fn list_scopes(&self) -> Result<Vec<Scope>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT DISTINCT tenant_id, site_id FROM evidences
             WHERE deleted_at IS NULL
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

    /// Legacy substring search ordered by confidence.
    pub fn search_like(
        &self,
        scope: &Scope,
        query: &str,
        domains: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<EvidenceRecord>> {
        let pattern = format!("%{}%", query);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, site_id, source_type, source_ref, title,
                    excerpt, confidence, verified, tags, domains, supersedes,
                    created_at
             FROM evidences
             WHERE tenant_id = ?1 AND site_id = ?2 AND deleted_at IS NULL
               AND (title LIKE ?3 OR excerpt LIKE ?3)
             ORDER BY confidence DESC
             LIMIT ?4",
        )?;
        let rows: Vec<EvidenceRecord> = stmt
            .query_map(
                rusqlite::params![scope.tenant_id, scope.site_id, pattern, limit],
                row_to_record,
            )?
            .filter_map(|r| r.ok())
            .collect();

        Ok(match domains {
            Some(filter) if !filter.is_empty() => rows
                .into_iter()
                .filter(|r| {
                    r.domains.iter().any(|d| filter.contains(d))
                        || r.tags.iter().any(|t| filter.contains(t))
                })
                .collect(),
            _ => rows,
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvidenceRecord> {
    let tags_json: String = row.get(9)?;
    let domains_json: String = row.get(10)?;
    Ok(EvidenceRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        site_id: row.get(2)?,
        source_type: row.get(3)?,
        source_ref: row.get(4)?,
        title: row.get(5)?,
        excerpt: row.get(6)?,
        confidence: row.get(7)?,
        verified: row.get::<_, i64>(8)? != 0,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        domains: serde_json::from_str(&domains_json).unwrap_or_default(),
        supersedes: row.get(11)?,
        created_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EvidenceStore {
        EvidenceStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn sample(title: &str) -> NewEvidence {
        NewEvidence {
            source_type: "archive".to_string(),
            source_ref: Some("book:1".to_string()),
            title: title.to_string(),
            excerpt: "一曰孝悌为本".to_string(),
            confidence: 0.9,
            verified: true,
            tags: vec!["family".to_string()],
            domains: vec!["heritage".to_string()],
        }
    }

    #[test]
    fn scope_isolation_on_get() {
        let store = store();
        let s1 = Scope::new("t1", "s1");
        let s2 = Scope::new("t1", "s2");
        let rec = store.insert(&s1, sample("严氏家训")).unwrap();
        assert!(store.get(&s1, &rec.id).unwrap().is_some());
        assert!(store.get(&s2, &rec.id).unwrap().is_none());
    }

    #[test]
    fn supersede_keeps_both_rows() {
        let store = store();
        let scope = Scope::new("t1", "s1");
        let old = store.insert(&scope, sample("严氏家训")).unwrap();
        let new = store.supersede(&scope, &old.id, sample("严氏家训（修订）")).unwrap();
        assert_eq!(new.supersedes.as_deref(), Some(old.id.as_str()));
        assert!(store.get(&scope, &old.id).unwrap().is_some());
    }

    #[test]
    fn soft_delete_hides_from_search() {
        let store = store();
        let scope = Scope::new("t1", "s1");
        let rec = store.insert(&scope, sample("严氏家训")).unwrap();
        store.soft_delete(&scope, &rec.id).unwrap();
        assert!(store.get(&scope, &rec.id).unwrap().is_none());
        assert!(store
            .search_like(&scope, "家训", None, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn like_search_matches_title_and_excerpt() {
        let store = store();
        let scope = Scope::new("t1", "s1");
        store.insert(&scope, sample("严氏家训")).unwrap();
        assert_eq!(store.search_like(&scope, "家训", None, 10).unwrap().len(), 1);
        assert_eq!(store.search_like(&scope, "孝悌", None, 10).unwrap().len(), 1);
        assert!(store.search_like(&scope, "无关", None, 10).unwrap().is_empty());
    }
}
