use crate::backend::InstallAttribution;
use crate::events::{EventKind, EventRecord, QueuedRecord, schema};
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use std::path::Path;

/// Durable backing store for the delivery pipeline: the FIFO event queue,
/// the per-event-name verification table, and the install attribution
/// cache. One sqlite database, opened once per manager.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db parent dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Append a record to the tail of the queue. Returns the assigned
    /// sequence number, or `None` if a record with the same id is already
    /// queued (insert is the dedupe point).
    pub fn enqueue(&self, record: &EventRecord) -> Result<Option<i64>> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO queue (id, kind, name, payload_json, created_at, attempts, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.kind.as_str(),
                record.name,
                record.payload.to_string(),
                record.created_at,
                record.attempts,
                record.last_error
            ],
        )?;
        if inserted == 0 {
            Ok(None)
        } else {
            Ok(Some(self.conn.last_insert_rowid()))
        }
    }

    pub fn peek_oldest(&self) -> Result<Option<QueuedRecord>> {
        self.conn
            .query_row(
                "SELECT seq, id, kind, name, payload_json, created_at, attempts, last_error
                 FROM queue ORDER BY seq ASC LIMIT 1",
                [],
                row_to_queued,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Remove a record by id. Idempotent: removing an absent id is a no-op.
    /// Returns whether a row was actually deleted.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM queue WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub fn all(&self) -> Result<Vec<QueuedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, id, kind, name, payload_json, created_at, attempts, last_error
             FROM queue ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_queued)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn update_attempts(&self, id: &str, attempts: i64, last_error: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE queue SET attempts = ?2, last_error = ?3 WHERE id = ?1",
            params![id, attempts, last_error],
        )?;
        Ok(())
    }

    /// Drop oldest records until the queue holds at most `capacity` rows.
    /// Returns the dropped records so the caller can log or report them.
    pub fn evict_over_capacity(&self, capacity: usize) -> Result<Vec<QueuedRecord>> {
        let excess = self.len()?.saturating_sub(capacity);
        if excess == 0 {
            return Ok(Vec::new());
        }
        let tx = self.conn.unchecked_transaction()?;
        let dropped = {
            let mut stmt = tx.prepare(
                "SELECT seq, id, kind, name, payload_json, created_at, attempts, last_error
                 FROM queue ORDER BY seq ASC LIMIT ?1",
            )?;
            stmt.query_map(params![excess as i64], row_to_queued)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        for rec in &dropped {
            tx.execute("DELETE FROM queue WHERE seq = ?1", params![rec.seq])?;
        }
        tx.commit()?;
        Ok(dropped)
    }

    pub fn is_verified(&self, event_name: &str) -> Result<bool> {
        let hit: Option<String> = self
            .conn
            .query_row(
                "SELECT event_name FROM verified_events WHERE event_name = ?1",
                params![event_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// One-way ratchet: marking an already-verified name is a no-op.
    pub fn mark_verified(&self, event_name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO verified_events (event_name, verified_at) VALUES (?1, ?2)",
            params![event_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn install_attribution(&self) -> Result<Option<InstallAttribution>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT attribution FROM install_state WHERE key = 0",
                [],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|v| {
            InstallAttribution::parse(&v).ok_or_else(|| anyhow!("bad attribution value '{v}'"))
        })
        .transpose()
    }

    pub fn set_install_attribution(&self, attribution: InstallAttribution) -> Result<()> {
        self.conn.execute(
            "INSERT INTO install_state (key, attribution, resolved_at, deeplink_checked)
             VALUES (0, ?1, ?2, 0)
             ON CONFLICT(key) DO UPDATE SET attribution = ?1, resolved_at = ?2",
            params![attribution.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn deeplink_checked(&self) -> Result<bool> {
        let flag: Option<i64> = self
            .conn
            .query_row(
                "SELECT deeplink_checked FROM install_state WHERE key = 0",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    pub fn mark_deeplink_checked(&self) -> Result<()> {
        self.conn.execute(
            "UPDATE install_state SET deeplink_checked = 1 WHERE key = 0",
            [],
        )?;
        Ok(())
    }
}

fn row_to_queued(row: &Row<'_>) -> rusqlite::Result<QueuedRecord> {
    let kind_raw: String = row.get(2)?;
    let payload_raw: String = row.get(4)?;
    Ok(QueuedRecord {
        seq: row.get(0)?,
        record: EventRecord {
            id: row.get(1)?,
            kind: EventKind::parse(&kind_raw).unwrap_or(EventKind::Custom),
            name: row.get(3)?,
            payload: serde_json::from_str(&payload_raw).unwrap_or(Value::Null),
            created_at: row.get(5)?,
            attempts: row.get(6)?,
            last_error: row.get(7)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> EventStore {
        EventStore::open(&dir.join("adtrack.db")).unwrap()
    }

    #[test]
    fn enqueue_assigns_fifo_sequence() {
        let tmp = tempdir().unwrap();
        let store = open_store(tmp.path());
        let a = EventRecord::custom("first", None).unwrap();
        let b = EventRecord::custom("second", None).unwrap();
        let seq_a = store.enqueue(&a).unwrap().unwrap();
        let seq_b = store.enqueue(&b).unwrap().unwrap();
        assert!(seq_a < seq_b);

        let head = store.peek_oldest().unwrap().unwrap();
        assert_eq!(head.record.id, a.id);
        assert_eq!(store.all().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_id_is_ignored_at_insert() {
        let tmp = tempdir().unwrap();
        let store = open_store(tmp.path());
        let rec = EventRecord::custom("signup", None).unwrap();
        assert!(store.enqueue(&rec).unwrap().is_some());
        assert!(store.enqueue(&rec).unwrap().is_none());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let tmp = tempdir().unwrap();
        let store = open_store(tmp.path());
        let rec = EventRecord::custom("signup", None).unwrap();
        store.enqueue(&rec).unwrap();
        assert!(store.remove(&rec.id).unwrap());
        assert!(!store.remove(&rec.id).unwrap());
        assert!(!store.remove("never-queued").unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn order_and_payload_survive_reopen() {
        let tmp = tempdir().unwrap();
        let db = tmp.path().join("adtrack.db");
        let ids: Vec<String> = {
            let store = EventStore::open(&db).unwrap();
            (0..3)
                .map(|i| {
                    let rec =
                        EventRecord::custom(&format!("ev{i}"), Some(json!({"n": i}))).unwrap();
                    store.enqueue(&rec).unwrap();
                    rec.id
                })
                .collect()
        };

        let store = EventStore::open(&db).unwrap();
        let all = store.all().unwrap();
        assert_eq!(
            all.iter().map(|q| q.record.id.clone()).collect::<Vec<_>>(),
            ids
        );
        assert_eq!(all[1].record.payload, json!({"n": 1}));
    }

    #[test]
    fn update_attempts_persists() {
        let tmp = tempdir().unwrap();
        let store = open_store(tmp.path());
        let rec = EventRecord::custom("signup", None).unwrap();
        store.enqueue(&rec).unwrap();
        store
            .update_attempts(&rec.id, 3, Some("network_operation_failed"))
            .unwrap();
        let head = store.peek_oldest().unwrap().unwrap();
        assert_eq!(head.record.attempts, 3);
        assert_eq!(
            head.record.last_error.as_deref(),
            Some("network_operation_failed")
        );
    }

    #[test]
    fn eviction_drops_oldest_first() {
        let tmp = tempdir().unwrap();
        let store = open_store(tmp.path());
        let recs: Vec<EventRecord> = (0..5)
            .map(|i| {
                let rec = EventRecord::custom(&format!("ev{i}"), None).unwrap();
                store.enqueue(&rec).unwrap();
                rec
            })
            .collect();

        let dropped = store.evict_over_capacity(3).unwrap();
        assert_eq!(dropped.len(), 2);
        assert_eq!(dropped[0].record.id, recs[0].id);
        assert_eq!(dropped[1].record.id, recs[1].id);
        assert_eq!(
            store.peek_oldest().unwrap().unwrap().record.id,
            recs[2].id
        );

        assert!(store.evict_over_capacity(3).unwrap().is_empty());
    }

    #[test]
    fn verification_is_a_persistent_ratchet() {
        let tmp = tempdir().unwrap();
        let db = tmp.path().join("adtrack.db");
        {
            let store = EventStore::open(&db).unwrap();
            assert!(!store.is_verified("purchase_complete").unwrap());
            store.mark_verified("purchase_complete").unwrap();
            store.mark_verified("purchase_complete").unwrap();
            assert!(store.is_verified("purchase_complete").unwrap());
        }
        let store = EventStore::open(&db).unwrap();
        assert!(store.is_verified("purchase_complete").unwrap());
        assert!(!store.is_verified("signup").unwrap());
    }

    #[test]
    fn attribution_cache_round_trips() {
        let tmp = tempdir().unwrap();
        let db = tmp.path().join("adtrack.db");
        {
            let store = EventStore::open(&db).unwrap();
            assert!(store.install_attribution().unwrap().is_none());
            store
                .set_install_attribution(InstallAttribution::Affiliate)
                .unwrap();
            assert!(!store.deeplink_checked().unwrap());
            store.mark_deeplink_checked().unwrap();
        }
        let store = EventStore::open(&db).unwrap();
        assert_eq!(
            store.install_attribution().unwrap(),
            Some(InstallAttribution::Affiliate)
        );
        assert!(store.deeplink_checked().unwrap());
    }
}
