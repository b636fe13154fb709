use rusqlite::{Connection, Result};

/// Initialise control-plane tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS policy_versions (
            name        TEXT NOT NULL,
            version     TEXT NOT NULL,
            description TEXT,
            content     TEXT NOT NULL DEFAULT '{}',
            operator    TEXT NOT NULL DEFAULT 'system',
            is_active   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (name, version)
        );

        CREATE TABLE IF NOT EXISTS releases (
            id           TEXT PRIMARY KEY,
            tenant_id    TEXT NOT NULL,
            site_id      TEXT NOT NULL,
            name         TEXT NOT NULL,
            description  TEXT,
            status       TEXT NOT NULL DEFAULT 'draft',
            payload      TEXT NOT NULL DEFAULT '{}',
            created_by   TEXT NOT NULL DEFAULT 'system',
            created_at   TEXT NOT NULL,
            activated_at TEXT,
            archived_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_releases_scope
            ON releases(tenant_id, site_id, status);

        CREATE TABLE IF NOT EXISTS release_history (
            id                  TEXT PRIMARY KEY,
            release_id          TEXT NOT NULL,
            tenant_id           TEXT NOT NULL,
            site_id             TEXT NOT NULL,
            action              TEXT NOT NULL,
            previous_release_id TEXT,
            operator            TEXT NOT NULL DEFAULT 'system',
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_release_history_scope
            ON release_history(tenant_id, site_id, created_at);

        CREATE TABLE IF NOT EXISTS experiments (
            id           TEXT PRIMARY KEY,
            tenant_id    TEXT NOT NULL,
            site_id      TEXT NOT NULL,
            name         TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'draft',
            subject_type TEXT NOT NULL DEFAULT 'session_id',
            variants     TEXT NOT NULL DEFAULT '[]',
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_experiments_scope
            ON experiments(tenant_id, site_id, status);

        CREATE TABLE IF NOT EXISTS experiment_assignments (
            experiment_id TEXT NOT NULL,
            subject_key   TEXT NOT NULL,
            variant       TEXT NOT NULL,
            bucket_hash   INTEGER NOT NULL,
            created_at    TEXT NOT NULL,
            PRIMARY KEY (experiment_id, subject_key)
        );",
    )
}
