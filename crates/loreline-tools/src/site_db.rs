use rusqlite::{Connection, Result};

/// Initialise site-content tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sites (
            id         TEXT NOT NULL,
            tenant_id  TEXT NOT NULL,
            name       TEXT NOT NULL,
            config     TEXT NOT NULL DEFAULT '{}',
            status     TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, id)
        );

        CREATE TABLE IF NOT EXISTS npc_profiles (
            tenant_id           TEXT NOT NULL,
            site_id             TEXT NOT NULL,
            npc_id              TEXT NOT NULL,
            version             INTEGER NOT NULL,
            active              INTEGER NOT NULL DEFAULT 0,
            name                TEXT NOT NULL,
            display_name        TEXT,
            npc_type            TEXT NOT NULL DEFAULT 'guide',
            persona             TEXT NOT NULL DEFAULT '{}',
            knowledge_domains   TEXT NOT NULL DEFAULT '[]',
            greeting_templates  TEXT NOT NULL DEFAULT '[]',
            fallback_responses  TEXT NOT NULL DEFAULT '[]',
            max_response_length INTEGER,
            must_cite_sources   INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL,
            deleted_at          TEXT,
            PRIMARY KEY (tenant_id, site_id, npc_id, version)
        );

        CREATE TABLE IF NOT EXISTS npc_prompts (
            tenant_id   TEXT NOT NULL,
            site_id     TEXT NOT NULL,
            npc_id      TEXT NOT NULL,
            prompt_type TEXT NOT NULL,
            version     INTEGER NOT NULL,
            content     TEXT NOT NULL,
            policy      TEXT NOT NULL DEFAULT '{}',
            description TEXT,
            author      TEXT,
            active      INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            deleted_at  TEXT,
            PRIMARY KEY (tenant_id, site_id, npc_id, prompt_type, version)
        );

        CREATE TABLE IF NOT EXISTS contents (
            id                TEXT PRIMARY KEY,
            tenant_id         TEXT NOT NULL,
            site_id           TEXT NOT NULL,
            content_type      TEXT NOT NULL,
            title             TEXT NOT NULL,
            summary           TEXT,
            body              TEXT NOT NULL DEFAULT '',
            tags              TEXT NOT NULL DEFAULT '[]',
            domains           TEXT NOT NULL DEFAULT '[]',
            category          TEXT,
            status            TEXT NOT NULL DEFAULT 'draft',
            credibility_score REAL NOT NULL DEFAULT 0.5,
            verified          INTEGER NOT NULL DEFAULT 0,
            source            TEXT,
            created_by        TEXT,
            created_at        TEXT NOT NULL,
            deleted_at        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_contents_scope
            ON contents(tenant_id, site_id, content_type);

        CREATE TABLE IF NOT EXISTS user_feedbacks (
            id                TEXT PRIMARY KEY,
            tenant_id         TEXT NOT NULL,
            site_id           TEXT NOT NULL,
            trace_id          TEXT,
            user_id           TEXT,
            feedback_type     TEXT NOT NULL,
            severity          TEXT NOT NULL,
            content           TEXT NOT NULL,
            original_response TEXT,
            suggested_fix     TEXT,
            tags              TEXT NOT NULL DEFAULT '[]',
            status            TEXT NOT NULL DEFAULT 'pending',
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_feedbacks_scope
            ON user_feedbacks(tenant_id, site_id, status, created_at DESC);

        CREATE TABLE IF NOT EXISTS analytics_events (
            id         TEXT PRIMARY KEY,
            tenant_id  TEXT NOT NULL,
            site_id    TEXT NOT NULL,
            trace_id   TEXT,
            user_id    TEXT,
            session_id TEXT,
            event_type TEXT NOT NULL,
            event_data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_scope
            ON analytics_events(tenant_id, site_id, event_type, created_at DESC);",
    )
}
