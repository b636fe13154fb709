use rusqlite::{Connection, Result};

/// Initialise the evidence table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS evidences (
            id          TEXT PRIMARY KEY,
            tenant_id   TEXT NOT NULL,
            site_id     TEXT NOT NULL,
            source_type TEXT NOT NULL,
            source_ref  TEXT,
            title       TEXT NOT NULL,
            excerpt     TEXT NOT NULL,
            confidence  REAL NOT NULL DEFAULT 1.0,
            verified    INTEGER NOT NULL DEFAULT 0,
            tags        TEXT NOT NULL DEFAULT '[]',
            domains     TEXT NOT NULL DEFAULT '[]',
            supersedes  TEXT,
            created_at  TEXT NOT NULL,
            deleted_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_evidences_scope
            ON evidences(tenant_id, site_id);",
    )
}
