use rusqlite::{Connection, Result};

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('registration','purchase','custom')),
            name TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_id ON queue(id);

        CREATE TABLE IF NOT EXISTS verified_events (
            event_name TEXT PRIMARY KEY,
            verified_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS install_state (
            key INTEGER PRIMARY KEY CHECK(key = 0),
            attribution TEXT NOT NULL CHECK(attribution IN ('affiliate','non_affiliate')),
            resolved_at TEXT NOT NULL,
            deeplink_checked INTEGER NOT NULL DEFAULT 0
        );
        ",
    )?;

    Ok(())
}
