use rusqlite::{Connection, Result};

/// Initialise alert tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS alerts_events (
            id              TEXT PRIMARY KEY,
            tenant_id       TEXT NOT NULL,
            site_id         TEXT,
            alert_code      TEXT NOT NULL,
            severity        TEXT NOT NULL,
            status          TEXT NOT NULL,
            window          TEXT NOT NULL,
            current_value   REAL NOT NULL,
            threshold       REAL NOT NULL,
            condition       TEXT NOT NULL,
            unit            TEXT NOT NULL,
            dedup_key       TEXT NOT NULL,
            first_seen_at   TEXT NOT NULL,
            last_seen_at    TEXT NOT NULL,
            resolved_at     TEXT,
            webhook_sent    TEXT,
            webhook_sent_at TEXT,
            context         TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_alerts_dedup
            ON alerts_events(dedup_key, status);
        CREATE INDEX IF NOT EXISTS idx_alerts_scope
            ON alerts_events(tenant_id, site_id, first_seen_at DESC);

        CREATE TABLE IF NOT EXISTS alerts_silences (
            id         TEXT PRIMARY KEY,
            tenant_id  TEXT NOT NULL,
            site_id    TEXT,
            alert_code TEXT,
            severity   TEXT,
            starts_at  TEXT NOT NULL,
            ends_at    TEXT NOT NULL,
            reason     TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_silences_tenant
            ON alerts_silences(tenant_id, ends_at);",
    )
}
