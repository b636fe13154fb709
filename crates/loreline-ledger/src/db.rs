use rusqlite::{Connection, Result};

/// Initialise the trace ledger table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS trace_ledger (
            trace_id           TEXT PRIMARY KEY,
            tenant_id          TEXT NOT NULL,
            site_id            TEXT NOT NULL,
            session_id         TEXT,
            npc_id             TEXT,
            request_type       TEXT NOT NULL,
            request_input      TEXT NOT NULL DEFAULT 'null',
            tool_calls         TEXT NOT NULL DEFAULT '[]',
            evidence_ids       TEXT NOT NULL DEFAULT '[]',
            policy_mode        TEXT NOT NULL,
            policy_reason      TEXT,
            response_output    TEXT,
            prompt_version     INTEGER,
            prompt_source      TEXT,
            persona_version    INTEGER,
            model_provider     TEXT,
            model_name         TEXT,
            tokens_input       INTEGER,
            tokens_output      INTEGER,
            latency_ms         INTEGER,
            status             TEXT NOT NULL,
            error              TEXT,
            started_at         TEXT NOT NULL,
            completed_at       TEXT,
            release_id         TEXT,
            experiment_id      TEXT,
            experiment_variant TEXT,
            strategy_snapshot  TEXT,
            created_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trace_scope
            ON trace_ledger(tenant_id, site_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_trace_session
            ON trace_ledger(session_id, created_at);",
    )
}
