use std::sync::Mutex;

use chrono::Utc;
use loreline_core::Scope;
use rusqlite::Connection;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::schemas::{
    ContentItem, FeedbackItem, NpcProfileView, PoiItem, SubmitFeedbackInput,
};
use crate::site_db::init_db;

/// Fields for a new persona version.
#[derive(Debug, Clone, Default)]
pub struct NewNpcProfile {
    pub name: String,
    pub display_name: Option<String>,
    pub npc_type: String,
    pub persona: Value,
    pub knowledge_domains: Vec<String>,
    pub greeting_templates: Vec<String>,
    pub fallback_responses: Vec<String>,
    pub max_response_length: Option<u32>,
    pub must_cite_sources: bool,
}

/// Fields for a new prompt version.
#[derive(Debug, Clone, Default)]
pub struct NewNpcPrompt {
    pub content: String,
    pub policy: Value,
    pub description: Option<String>,
    pub author: Option<String>,
}

/// A prompt-registry row.
#[derive(Debug, Clone)]
pub struct PromptRow {
    pub npc_id: String,
    pub prompt_type: String,
    pub version: i64,
    pub content: String,
    pub policy: Value,
    pub description: Option<String>,
    pub author: Option<String>,
}

/// Storage for per-site entities: sites, personas, prompts, contents,
/// feedback, and analytics events.
///
/// Personas and prompts are versioned: a write never mutates an existing
/// version, it inserts the next one and optionally re-activates.
pub struct SiteStore {
    db: Mutex<Connection>,
}

impl SiteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    // --- sites -------------------------------------------------------------

    pub fn upsert_site(&self, scope: &Scope, name: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sites (id, tenant_id, name, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant_id, id) DO UPDATE SET name = excluded.name",
            rusqlite::params![scope.site_id, scope.tenant_id, name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_site_name(&self, scope: &Scope) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT name FROM sites WHERE tenant_id = ?1 AND id = ?2",
                rusqlite::params![scope.tenant_id, scope.site_id],
                |row| row.get(0),
            )
            .ok())
    }

    // --- personas ----------------------------------------------------------

    /// Insert the next persona version. When `activate` is set, the new
    /// version becomes the single active one for this npc_id.
    pub fn create_npc_profile(
        &self,
        scope: &Scope,
        npc_id: &str,
        new: NewNpcProfile,
        activate: bool,
    ) -> Result<NpcProfileView> {
        let db = self.db.lock().unwrap();
        let next_version: i64 = db.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM npc_profiles
             WHERE tenant_id = ?1 AND site_id = ?2 AND npc_id = ?3",
            rusqlite::params![scope.tenant_id, scope.site_id, npc_id],
            |row| row.get(0),
        )?;

        if activate {
            db.execute(
                "UPDATE npc_profiles SET active = 0
                 WHERE tenant_id = ?1 AND site_id = ?2 AND npc_id = ?3",
                rusqlite::params![scope.tenant_id, scope.site_id, npc_id],
            )?;
        }

        db.execute(
            "INSERT INTO npc_profiles
             (tenant_id, site_id, npc_id, version, active, name, display_name,
              npc_type, persona, knowledge_domains, greeting_templates,
              fallback_responses, max_response_length, must_cite_sources, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            rusqlite::params![
                scope.tenant_id,
                scope.site_id,
                npc_id,
                next_version,
                activate as i64,
                new.name,
                new.display_name,
                new.npc_type,
                serde_json::to_string(&new.persona)?,
                serde_json::to_string(&new.knowledge_domains)?,
                serde_json::to_string(&new.greeting_templates)?,
                serde_json::to_string(&new.fallback_responses)?,
                new.max_response_length,
                new.must_cite_sources as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        info!(npc_id, version = next_version, activate, "persona version created");

        Ok(NpcProfileView {
            npc_id: npc_id.to_string(),
            version: next_version,
            active: activate,
            name: new.name,
            display_name: new.display_name,
            npc_type: new.npc_type,
            persona: new.persona,
            knowledge_domains: new.knowledge_domains,
            greeting_templates: new.greeting_templates,
            fallback_responses: new.fallback_responses,
            max_response_length: new.max_response_length,
            must_cite_sources: new.must_cite_sources,
        })
    }

    /// Load a persona: the active version by default, or a pinned one.
    pub fn get_npc_profile(
        &self,
        scope: &Scope,
        npc_id: &str,
        version: Option<i64>,
    ) -> Result<Option<NpcProfileView>> {
        let db = self.db.lock().unwrap();
        let base = "SELECT npc_id, version, active, name, display_name, npc_type,
                           persona, knowledge_domains, greeting_templates,
                           fallback_responses, max_response_length, must_cite_sources
                    FROM npc_profiles
                    WHERE tenant_id = ?1 AND site_id = ?2 AND npc_id = ?3
                      AND deleted_at IS NULL";
        let row = match version {
            Some(v) => db
                .query_row(
                    &format!("{} AND version = ?4", base),
                    rusqlite::params![scope.tenant_id, scope.site_id, npc_id, v],
                    row_to_profile,
                )
                .ok(),
            None => db
                .query_row(
                    &format!("{} AND active = 1", base),
                    rusqlite::params![scope.tenant_id, scope.site_id, npc_id],
                    row_to_profile,
                )
                .ok(),
        };
        Ok(row)
    }

    // --- prompts -----------------------------------------------------------

    pub fn create_npc_prompt(
        &self,
        scope: &Scope,
        npc_id: &str,
        prompt_type: &str,
        new: NewNpcPrompt,
        activate: bool,
    ) -> Result<PromptRow> {
        let db = self.db.lock().unwrap();
        let next_version: i64 = db.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM npc_prompts
             WHERE tenant_id = ?1 AND site_id = ?2 AND npc_id = ?3 AND prompt_type = ?4",
            rusqlite::params![scope.tenant_id, scope.site_id, npc_id, prompt_type],
            |row| row.get(0),
        )?;

        if activate {
            db.execute(
                "UPDATE npc_prompts SET active = 0
                 WHERE tenant_id = ?1 AND site_id = ?2 AND npc_id = ?3 AND prompt_type = ?4",
                rusqlite::params![scope.tenant_id, scope.site_id, npc_id, prompt_type],
            )?;
        }

        db.execute(
            "INSERT INTO npc_prompts
             (tenant_id, site_id, npc_id, prompt_type, version, content, policy,
              description, author, active, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            rusqlite::params![
                scope.tenant_id,
                scope.site_id,
                npc_id,
                prompt_type,
                next_version,
                new.content,
                serde_json::to_string(&new.policy)?,
                new.description,
                new.author,
                activate as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        info!(npc_id, prompt_type, version = next_version, "prompt version created");

        Ok(PromptRow {
            npc_id: npc_id.to_string(),
            prompt_type: prompt_type.to_string(),
            version: next_version,
            content: new.content,
            policy: new.policy,
            description: new.description,
            author: new.author,
        })
    }

    pub fn get_active_prompt(
        &self,
        scope: &Scope,
        npc_id: &str,
        prompt_type: &str,
    ) -> Result<Option<PromptRow>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT npc_id, prompt_type, version, content, policy, description, author
                 FROM npc_prompts
                 WHERE tenant_id = ?1 AND site_id = ?2 AND npc_id = ?3
                   AND prompt_type = ?4 AND active = 1 AND deleted_at IS NULL",
                rusqlite::params![scope.tenant_id, scope.site_id, npc_id, prompt_type],
                |row| {
                    let policy_json: String = row.get(4)?;
                    Ok(PromptRow {
                        npc_id: row.get(0)?,
                        prompt_type: row.get(1)?,
                        version: row.get(2)?,
                        content: row.get(3)?,
                        policy: serde_json::from_str(&policy_json).unwrap_or(Value::Null),
                        description: row.get(5)?,
                        author: row.get(6)?,
                    })
                },
            )
            .ok();
        Ok(row)
    }

    // --- contents ----------------------------------------------------------

    pub fn search_content(
        &self,
        scope: &Scope,
        query: &str,
        content_type: Option<&str>,
        tags: Option<&[String]>,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let pattern = format!("%{}%", query);
        let db = self.db.lock().unwrap();
        let mut sql = "SELECT id, content_type, title, summary, body, tags, domains,
                              credibility_score, verified
                       FROM contents
                       WHERE tenant_id = ?1 AND site_id = ?2 AND deleted_at IS NULL
                         AND (title LIKE ?3 OR body LIKE ?3)"
            .to_string();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(scope.tenant_id.clone()),
            Box::new(scope.site_id.clone()),
            Box::new(pattern),
        ];
        if let Some(ct) = content_type {
            params.push(Box::new(ct.to_string()));
            sql.push_str(&format!(" AND content_type = ?{}", params.len()));
        }
        if let Some(st) = status {
            params.push(Box::new(st.to_string()));
            sql.push_str(&format!(" AND status = ?{}", params.len()));
        }
        params.push(Box::new(limit as i64));
        sql.push_str(&format!(
            " ORDER BY credibility_score DESC LIMIT ?{}",
            params.len()
        ));

        let mut stmt = db.prepare(&sql)?;
        let rows: Vec<ContentItem> = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                row_to_content,
            )?
            .filter_map(|r| r.ok())
            .collect();

        Ok(match tags {
            Some(filter) if !filter.is_empty() => rows
                .into_iter()
                .filter(|c| c.tags.iter().any(|t| filter.contains(t)))
                .collect(),
            _ => rows,
        })
    }

    pub fn create_draft_content(
        &self,
        scope: &Scope,
        content_type: &str,
        title: &str,
        body: &str,
        summary: Option<&str>,
        tags: &[String],
        domains: &[String],
        source: Option<&str>,
        created_by: Option<&str>,
    ) -> Result<(String, String)> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO contents
             (id, tenant_id, site_id, content_type, title, summary, body, tags,
              domains, status, source, created_by, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,'draft',?10,?11,?12)",
            rusqlite::params![
                id,
                scope.tenant_id,
                scope.site_id,
                content_type,
                title,
                summary,
                body,
                serde_json::to_string(tags)?,
                serde_json::to_string(domains)?,
                source,
                created_by,
                created_at,
            ],
        )?;
        Ok((id, created_at))
    }

    /// Published contents of one type, for the site map.
    pub fn list_published_by_type(&self, scope: &Scope, content_type: &str) -> Result<Vec<PoiItem>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, title, category, summary FROM contents
             WHERE tenant_id = ?1 AND site_id = ?2 AND content_type = ?3
               AND status = 'published' AND deleted_at IS NULL",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![scope.tenant_id, scope.site_id, content_type],
                |row| {
                    Ok(PoiItem {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        poi_type: row
                            .get::<_, Option<String>>(2)?
                            .unwrap_or_else(|| "default".to_string()),
                        description: row.get(3)?,
                    })
                },
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // --- analytics ---------------------------------------------------------

    pub fn log_event(
        &self,
        scope: &Scope,
        trace_id: Option<&str>,
        user_id: Option<&str>,
        session_id: Option<&str>,
        event_type: &str,
        event_data: &Value,
    ) -> Result<(String, String)> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO analytics_events
             (id, tenant_id, site_id, trace_id, user_id, session_id, event_type,
              event_data, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            rusqlite::params![
                id,
                scope.tenant_id,
                scope.site_id,
                trace_id,
                user_id,
                session_id,
                event_type,
                serde_json::to_string(event_data)?,
                created_at,
            ],
        )?;
        Ok((id, created_at))
    }

    // --- feedback ----------------------------------------------------------

    pub fn submit_feedback(
        &self,
        scope: &Scope,
        user_id: Option<&str>,
        input: &SubmitFeedbackInput,
        trace_id: Option<&str>,
    ) -> Result<(String, String)> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO user_feedbacks
             (id, tenant_id, site_id, trace_id, user_id, feedback_type, severity,
              content, original_response, suggested_fix, tags, status, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,'pending',?12)",
            rusqlite::params![
                id,
                scope.tenant_id,
                scope.site_id,
                input.trace_id.as_deref().or(trace_id),
                user_id,
                input.feedback_type,
                input.severity,
                input.content,
                input.original_response,
                input.suggested_fix,
                serde_json::to_string(&input.tags)?,
                created_at,
            ],
        )?;
        Ok((id, created_at))
    }

    pub fn list_feedback(
        &self,
        scope: &Scope,
        status: Option<&str>,
        feedback_type: Option<&str>,
        severity: Option<&str>,
        limit: usize,
    ) -> Result<(Vec<FeedbackItem>, usize)> {
        let db = self.db.lock().unwrap();
        let mut conditions = "tenant_id = ?1 AND site_id = ?2".to_string();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(scope.tenant_id.clone()),
            Box::new(scope.site_id.clone()),
        ];
        for (col, v) in [
            ("status", status),
            ("feedback_type", feedback_type),
            ("severity", severity),
        ] {
            if let Some(v) = v {
                params.push(Box::new(v.to_string()));
                conditions.push_str(&format!(" AND {} = ?{}", col, params.len()));
            }
        }

        let total: usize = db.query_row(
            &format!("SELECT COUNT(*) FROM user_feedbacks WHERE {}", conditions),
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| row.get(0),
        )?;

        params.push(Box::new(limit as i64));
        let mut stmt = db.prepare(&format!(
            "SELECT id, trace_id, feedback_type, severity, content, status, created_at
             FROM user_feedbacks WHERE {}
             ORDER BY created_at DESC LIMIT ?{}",
            conditions,
            params.len()
        ))?;
        let items = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                |row| {
                    Ok(FeedbackItem {
                        id: row.get(0)?,
                        trace_id: row.get(1)?,
                        feedback_type: row.get(2)?,
                        severity: row.get(3)?,
                        content: row.get(4)?,
                        status: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok((items, total))
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<NpcProfileView> {
    let persona_json: String = row.get(6)?;
    let domains_json: String = row.get(7)?;
    let greetings_json: String = row.get(8)?;
    let fallbacks_json: String = row.get(9)?;
    Ok(NpcProfileView {
        npc_id: row.get(0)?,
        version: row.get(1)?,
        active: row.get::<_, i64>(2)? != 0,
        name: row.get(3)?,
        display_name: row.get(4)?,
        npc_type: row.get(5)?,
        persona: serde_json::from_str(&persona_json).unwrap_or(Value::Null),
        knowledge_domains: serde_json::from_str(&domains_json).unwrap_or_default(),
        greeting_templates: serde_json::from_str(&greetings_json).unwrap_or_default(),
        fallback_responses: serde_json::from_str(&fallbacks_json).unwrap_or_default(),
        max_response_length: row.get(10)?,
        must_cite_sources: row.get::<_, i64>(11)? != 0,
    })
}

fn row_to_content(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentItem> {
    let tags_json: String = row.get(5)?;
    let domains_json: String = row.get(6)?;
    let body: String = row.get(4)?;
    Ok(ContentItem {
        id: row.get(0)?,
        content_type: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        body: body.chars().take(500).collect(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        domains: serde_json::from_str(&domains_json).unwrap_or_default(),
        credibility_score: row.get(7)?,
        verified: row.get::<_, i64>(8)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SiteStore {
        SiteStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn scope() -> Scope {
        Scope::new("t1", "s1")
    }

    fn profile_fields(name: &str) -> NewNpcProfile {
        NewNpcProfile {
            name: name.to_string(),
            display_name: Some("老严".to_string()),
            npc_type: "ancestor".to_string(),
            persona: json!({"identity": {"era": "明清"}}),
            knowledge_domains: vec!["家训".to_string()],
            must_cite_sources: true,
            ..NewNpcProfile::default()
        }
    }

    #[test]
    fn persona_versions_are_monotone_and_single_active() {
        let store = store();
        let scope = scope();
        let v1 = store
            .create_npc_profile(&scope, "ancestor", profile_fields("yan"), true)
            .unwrap();
        let v2 = store
            .create_npc_profile(&scope, "ancestor", profile_fields("yan"), true)
            .unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);

        let active = store.get_npc_profile(&scope, "ancestor", None).unwrap().unwrap();
        assert_eq!(active.version, 2);

        // The old version is still addressable.
        let pinned = store.get_npc_profile(&scope, "ancestor", Some(1)).unwrap().unwrap();
        assert_eq!(pinned.version, 1);
        assert!(!pinned.active);
    }

    #[test]
    fn prompt_registry_returns_active_only() {
        let store = store();
        let scope = scope();
        store
            .create_npc_prompt(
                &scope,
                "ancestor",
                "system",
                NewNpcPrompt {
                    content: "v1".to_string(),
                    policy: json!({"require_citations": true}),
                    ..NewNpcPrompt::default()
                },
                true,
            )
            .unwrap();
        store
            .create_npc_prompt(
                &scope,
                "ancestor",
                "system",
                NewNpcPrompt {
                    content: "v2".to_string(),
                    ..NewNpcPrompt::default()
                },
                true,
            )
            .unwrap();

        let active = store.get_active_prompt(&scope, "ancestor", "system").unwrap().unwrap();
        assert_eq!(active.version, 2);
        assert_eq!(active.content, "v2");
    }

    #[test]
    fn draft_content_is_created_as_draft() {
        let store = store();
        let scope = scope();
        let (id, _) = store
            .create_draft_content(&scope, "story", "题目", "正文", None, &[], &[], None, None)
            .unwrap();
        // Draft content is not published, so it is absent from the site map.
        assert!(store.list_published_by_type(&scope, "story").unwrap().is_empty());
        let found = store
            .search_content(&scope, "题目", None, None, None, 10)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
    }

    #[test]
    fn feedback_lists_with_filters() {
        let store = store();
        let scope = scope();
        for severity in ["low", "high"] {
            store
                .submit_feedback(
                    &scope,
                    None,
                    &SubmitFeedbackInput {
                        trace_id: None,
                        feedback_type: "correction".to_string(),
                        severity: severity.to_string(),
                        content: "text".to_string(),
                        original_response: None,
                        suggested_fix: None,
                        tags: vec![],
                    },
                    None,
                )
                .unwrap();
        }
        let (items, total) = store
            .list_feedback(&scope, Some("pending"), None, Some("high"), 10)
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].severity, "high");
        assert_eq!(items[0].status, "pending");
    }
}
