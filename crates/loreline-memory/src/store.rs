use std::sync::Mutex;

use chrono::{Duration, Utc};
use loreline_core::Scope;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::init_db;
use crate::error::Result;
use crate::types::{Message, Preference, SessionSummary, SummaryMessage};

/// Limits applied to short memory. Count trimming happens on append; char
/// trimming happens on read, newest-first, so the oldest messages drop out
/// first in both cases.
#[derive(Debug, Clone)]
pub struct MemoryLimits {
    pub max_messages: usize,
    pub max_chars: usize,
    pub ttl_seconds: i64,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_messages: 10,
            max_chars: 4000,
            ttl_seconds: 86_400,
        }
    }
}

/// Per-session conversation memory plus the cross-NPC preference record.
///
/// Thread-safe: the SQLite connection sits behind a Mutex, which also
/// serialises appends, so two appends for the same `(session, npc)` can never
/// interleave at the row level.
pub struct MemoryStore {
    db: Mutex<Connection>,
    limits: MemoryLimits,
}

impl MemoryStore {
    pub fn new(conn: Connection, limits: MemoryLimits) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            limits,
        })
    }

    pub fn limits(&self) -> &MemoryLimits {
        &self.limits
    }

    /// Append one message to the NPC-isolated short memory, refreshing the
    /// TTL and evicting the oldest rows past `max_messages`.
    pub fn append_message(
        &self,
        scope: &Scope,
        session_id: &str,
        npc_id: &str,
        message: &Message,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = Utc::now();
        let expires = (now + Duration::seconds(self.limits.ttl_seconds)).to_rfc3339();

        db.execute(
            "INSERT INTO session_messages
             (tenant_id, site_id, session_id, npc_id, role, content, trace_id,
              created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                scope.tenant_id,
                scope.site_id,
                session_id,
                npc_id,
                message.role.as_str(),
                message.content,
                message.trace_id,
                message.timestamp,
                expires,
            ],
        )?;

        // Count trimming: keep the newest max_messages rows for this key.
        db.execute(
            "DELETE FROM session_messages
             WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3 AND npc_id = ?4
               AND id NOT IN (
                   SELECT id FROM session_messages
                   WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3 AND npc_id = ?4
                   ORDER BY id DESC LIMIT ?5
               )",
            rusqlite::params![
                scope.tenant_id,
                scope.site_id,
                session_id,
                npc_id,
                self.limits.max_messages,
            ],
        )?;

        debug!(session_id, npc_id, role = message.role.as_str(), "message appended");
        Ok(())
    }

    /// Recent messages in chronological order, trimmed oldest-first.
    ///
    /// Count trimming applies before char trimming: the newest `limit` rows
    /// are loaded, then messages are kept newest-first until `max_chars`
    /// would be exceeded.
    pub fn get_recent_messages(
        &self,
        scope: &Scope,
        session_id: &str,
        npc_id: &str,
        limit: Option<usize>,
        max_chars: Option<usize>,
    ) -> Result<Vec<Message>> {
        let limit = limit.unwrap_or(self.limits.max_messages);
        let max_chars = max_chars.unwrap_or(self.limits.max_chars);
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT role, content, trace_id, created_at
             FROM session_messages
             WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3 AND npc_id = ?4
               AND expires_at > ?5
             ORDER BY id DESC
             LIMIT ?6",
        )?;
        let rows: Vec<Message> = stmt
            .query_map(
                rusqlite::params![
                    scope.tenant_id,
                    scope.site_id,
                    session_id,
                    npc_id,
                    now,
                    limit
                ],
                row_to_message,
            )?
            .filter_map(|r| r.ok())
            .collect();

        // rows are newest-first; keep until the char budget runs out, then
        // flip to chronological order.
        let mut kept: Vec<Message> = Vec::with_capacity(rows.len());
        let mut total_chars = 0usize;
        for msg in rows {
            let chars = msg.content.chars().count();
            if total_chars + chars > max_chars {
                break;
            }
            total_chars += chars;
            kept.push(msg);
        }
        kept.reverse();
        Ok(kept)
    }

    /// Clear one NPC's short memory, or the whole session (all NPCs plus
    /// the preference record) when `npc_id` is `None`.
    pub fn clear_session(&self, scope: &Scope, session_id: &str, npc_id: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        match npc_id {
            Some(npc) => {
                db.execute(
                    "DELETE FROM session_messages
                     WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3 AND npc_id = ?4",
                    rusqlite::params![scope.tenant_id, scope.site_id, session_id, npc],
                )?;
                info!(session_id, npc_id = npc, "npc session memory cleared");
            }
            None => {
                db.execute(
                    "DELETE FROM session_messages
                     WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3",
                    rusqlite::params![scope.tenant_id, scope.site_id, session_id],
                )?;
                db.execute(
                    "DELETE FROM session_preferences
                     WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3",
                    rusqlite::params![scope.tenant_id, scope.site_id, session_id],
                )?;
                info!(session_id, "session memory cleared");
            }
        }
        Ok(())
    }

    /// Session summary for trace replay. Message content is clipped to 100
    /// characters.
    pub fn get_session_summary(
        &self,
        scope: &Scope,
        session_id: &str,
        npc_id: Option<&str>,
        max_messages: usize,
    ) -> Result<SessionSummary> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();

        let (count_sql, list_sql) = match npc_id {
            Some(_) => (
                "SELECT COUNT(*) FROM session_messages
                 WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3 AND npc_id = ?4
                   AND expires_at > ?5",
                "SELECT role, content, trace_id, created_at FROM session_messages
                 WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3 AND npc_id = ?4
                   AND expires_at > ?5
                 ORDER BY id DESC LIMIT ?6",
            ),
            None => (
                "SELECT COUNT(*) FROM session_messages
                 WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3
                   AND expires_at > ?4",
                "SELECT role, content, trace_id, created_at FROM session_messages
                 WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3
                   AND expires_at > ?4
                 ORDER BY id DESC LIMIT ?5",
            ),
        };

        let (message_count, mut messages): (usize, Vec<Message>) = match npc_id {
            Some(npc) => {
                let count: usize = db.query_row(
                    count_sql,
                    rusqlite::params![scope.tenant_id, scope.site_id, session_id, npc, now],
                    |row| row.get(0),
                )?;
                let mut stmt = db.prepare(list_sql)?;
                let msgs = stmt
                    .query_map(
                        rusqlite::params![
                            scope.tenant_id,
                            scope.site_id,
                            session_id,
                            npc,
                            now,
                            max_messages
                        ],
                        row_to_message,
                    )?
                    .filter_map(|r| r.ok())
                    .collect();
                (count, msgs)
            }
            None => {
                let count: usize = db.query_row(
                    count_sql,
                    rusqlite::params![scope.tenant_id, scope.site_id, session_id, now],
                    |row| row.get(0),
                )?;
                let mut stmt = db.prepare(list_sql)?;
                let msgs = stmt
                    .query_map(
                        rusqlite::params![
                            scope.tenant_id,
                            scope.site_id,
                            session_id,
                            now,
                            max_messages
                        ],
                        row_to_message,
                    )?
                    .filter_map(|r| r.ok())
                    .collect();
                (count, msgs)
            }
        };
        messages.reverse();

        Ok(SessionSummary {
            session_id: session_id.to_string(),
            npc_id: npc_id.map(String::from),
            message_count,
            first_message_at: messages.first().map(|m| m.timestamp.clone()),
            last_message_at: messages.last().map(|m| m.timestamp.clone()),
            recent_messages: messages
                .into_iter()
                .map(|m| SummaryMessage {
                    role: m.role.as_str().to_string(),
                    content: clip_chars(&m.content, 100),
                    timestamp: m.timestamp,
                })
                .collect(),
        })
    }

    // --- preference memory -------------------------------------------------

    pub fn get_preference(&self, scope: &Scope, session_id: &str) -> Result<Preference> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let row: Option<(Option<String>, Option<String>, String)> = db
            .query_row(
                "SELECT verbosity, tone, interest_tags FROM session_preferences
                 WHERE tenant_id = ?1 AND site_id = ?2 AND session_id = ?3
                   AND expires_at > ?4",
                rusqlite::params![scope.tenant_id, scope.site_id, session_id, now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();

        Ok(match row {
            Some((verbosity, tone, tags_json)) => Preference {
                verbosity,
                tone,
                interest_tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            },
            None => Preference::default(),
        })
    }

    /// Merge the given fields into the preference record. `None` fields are
    /// left untouched; the TTL is refreshed on every write.
    pub fn update_preference(
        &self,
        scope: &Scope,
        session_id: &str,
        update: &Preference,
    ) -> Result<Preference> {
        let mut current = self.get_preference(scope, session_id)?;
        if let Some(v) = &update.verbosity {
            current.verbosity = Some(v.clone());
        }
        if let Some(t) = &update.tone {
            current.tone = Some(t.clone());
        }
        for tag in &update.interest_tags {
            if !current.interest_tags.contains(tag) {
                current.interest_tags.push(tag.clone());
            }
        }
        self.write_preference(scope, session_id, &current)?;
        Ok(current)
    }

    pub fn add_interest_tag(&self, scope: &Scope, session_id: &str, tag: &str) -> Result<Preference> {
        self.update_preference(
            scope,
            session_id,
            &Preference {
                interest_tags: vec![tag.to_string()],
                ..Preference::default()
            },
        )
    }

    fn write_preference(&self, scope: &Scope, session_id: &str, pref: &Preference) -> Result<()> {
        let now = Utc::now();
        let expires = (now + Duration::seconds(self.limits.ttl_seconds)).to_rfc3339();
        let tags_json = serde_json::to_string(&pref.interest_tags)?;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO session_preferences
             (tenant_id, site_id, session_id, verbosity, tone, interest_tags,
              updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tenant_id, site_id, session_id) DO UPDATE SET
               verbosity = excluded.verbosity,
               tone = excluded.tone,
               interest_tags = excluded.interest_tags,
               updated_at = excluded.updated_at,
               expires_at = excluded.expires_at",
            rusqlite::params![
                scope.tenant_id,
                scope.site_id,
                session_id,
                pref.verbosity,
                pref.tone,
                tags_json,
                now.to_rfc3339(),
                expires,
            ],
        )?;
        Ok(())
    }
}

/// Render short memory for prompt injection.
///
/// The header marks the block as context only: facts must come from the
/// evidence corpus, never from conversation history.
pub fn build_context_prompt(messages: &[Message], npc_name: &str) -> String {
    if messages.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        "【对话历史 - 仅供上下文参考，不作为事实依据】".to_string(),
        "以下是与用户的近期对话，帮助你理解用户的兴趣和问题背景。".to_string(),
        "注意：任何历史事实、人物、事件的信息必须来自证据库，不能仅凭对话历史回答。".to_string(),
        String::new(),
    ];

    for msg in messages {
        match msg.role {
            loreline_core::MessageRole::User => lines.push(format!("用户: {}", msg.content)),
            _ => lines.push(format!("{}: {}", npc_name, msg.content)),
        }
    }

    lines.push(String::new());
    lines.push("【对话历史结束】".to_string());
    lines.join("\n")
}

fn clip_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let clipped: String = s.chars().take(max).collect();
    format!("{}...", clipped)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(0)?;
    Ok(Message {
        role: role_str.parse().unwrap_or(loreline_core::MessageRole::User),
        content: row.get(1)?,
        trace_id: row.get(2)?,
        timestamp: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreline_core::MessageRole;

    fn store() -> MemoryStore {
        MemoryStore::new(Connection::open_in_memory().unwrap(), MemoryLimits::default()).unwrap()
    }

    fn scope() -> Scope {
        Scope::new("t1", "s1")
    }

    #[test]
    fn append_then_read_preserves_order() {
        let store = store();
        let scope = scope();
        for i in 0..3 {
            store
                .append_message(
                    &scope,
                    "sess",
                    "npc",
                    &Message::new(MessageRole::User, format!("m{}", i), None),
                )
                .unwrap();
        }
        let msgs = store
            .get_recent_messages(&scope, "sess", "npc", None, None)
            .unwrap();
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn count_limit_evicts_oldest() {
        let store = MemoryStore::new(
            Connection::open_in_memory().unwrap(),
            MemoryLimits {
                max_messages: 3,
                ..MemoryLimits::default()
            },
        )
        .unwrap();
        let scope = scope();
        for i in 0..4 {
            store
                .append_message(
                    &scope,
                    "sess",
                    "npc",
                    &Message::new(MessageRole::User, format!("m{}", i), None),
                )
                .unwrap();
        }
        let msgs = store
            .get_recent_messages(&scope, "sess", "npc", None, None)
            .unwrap();
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn char_limit_trims_after_count_limit() {
        let store = store();
        let scope = scope();
        for i in 0..3 {
            store
                .append_message(
                    &scope,
                    "sess",
                    "npc",
                    &Message::new(MessageRole::User, format!("message-{}", i), None),
                )
                .unwrap();
        }
        // Each message is 9 chars; a budget of 20 keeps only the newest two.
        let msgs = store
            .get_recent_messages(&scope, "sess", "npc", None, Some(20))
            .unwrap();
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message-1", "message-2"]);
    }

    #[test]
    fn npc_memories_are_isolated() {
        let store = store();
        let scope = scope();
        store
            .append_message(&scope, "sess", "npc_a", &Message::new(MessageRole::User, "for a", None))
            .unwrap();
        store
            .append_message(&scope, "sess", "npc_b", &Message::new(MessageRole::User, "for b", None))
            .unwrap();

        let a = store.get_recent_messages(&scope, "sess", "npc_a", None, None).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "for a");

        store.clear_session(&scope, "sess", Some("npc_a")).unwrap();
        assert!(store
            .get_recent_messages(&scope, "sess", "npc_a", None, None)
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .get_recent_messages(&scope, "sess", "npc_b", None, None)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn preference_merges_and_dedups_tags() {
        let store = store();
        let scope = scope();
        store
            .update_preference(
                &scope,
                "sess",
                &Preference {
                    verbosity: Some("brief".to_string()),
                    ..Preference::default()
                },
            )
            .unwrap();
        store.add_interest_tag(&scope, "sess", "architecture").unwrap();
        let pref = store.add_interest_tag(&scope, "sess", "architecture").unwrap();
        assert_eq!(pref.verbosity.as_deref(), Some("brief"));
        assert_eq!(pref.interest_tags, vec!["architecture"]);
    }

    #[test]
    fn summary_clips_content_and_counts() {
        let store = store();
        let scope = scope();
        let long = "x".repeat(150);
        store
            .append_message(&scope, "sess", "npc", &Message::new(MessageRole::User, long, None))
            .unwrap();
        let summary = store
            .get_session_summary(&scope, "sess", Some("npc"), 5)
            .unwrap();
        assert_eq!(summary.message_count, 1);
        assert!(summary.recent_messages[0].content.ends_with("..."));
        assert_eq!(summary.recent_messages[0].content.chars().count(), 103);
        assert!(summary.first_message_at.is_some());
    }

    #[test]
    fn context_prompt_carries_disclaimer() {
        let msgs = vec![Message::new(MessageRole::User, "你好", None)];
        let prompt = build_context_prompt(&msgs, "老严");
        assert!(prompt.contains("不作为事实依据"));
        assert!(prompt.contains("用户: 你好"));
        assert!(build_context_prompt(&[], "老严").is_empty());
    }
}
