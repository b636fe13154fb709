use rusqlite::{Connection, Result};

/// Initialise session-memory tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_messages_table(conn)?;
    create_preferences_table(conn)?;
    Ok(())
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id   TEXT NOT NULL,
            site_id     TEXT NOT NULL,
            session_id  TEXT NOT NULL,
            npc_id      TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            trace_id    TEXT,
            created_at  TEXT NOT NULL,
            expires_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_key
            ON session_messages(tenant_id, site_id, session_id, npc_id, id);",
    )
}

fn create_preferences_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_preferences (
            tenant_id     TEXT NOT NULL,
            site_id       TEXT NOT NULL,
            session_id    TEXT NOT NULL,
            verbosity     TEXT,
            tone          TEXT,
            interest_tags TEXT NOT NULL DEFAULT '[]',
            updated_at    TEXT NOT NULL,
            expires_at    TEXT NOT NULL,
            PRIMARY KEY (tenant_id, site_id, session_id)
        );",
    )
}
