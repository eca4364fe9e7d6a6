//! Append-only snapshot log backed by SQLite
//!
//! Snapshots for a (user, course) pair form a time-ordered, append-only
//! history. Rows are never updated or deleted; the rowid doubles as a
//! monotonic sequence number that breaks run_timestamp ties.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// One immutable capture of a learner's estimated mastery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: i64,
    pub user_id: String,
    pub course_id: String,
    pub run_timestamp: DateTime<Utc>,
    /// Heterogeneous entity records exactly as the estimator returned them.
    pub raw_entities: Vec<Value>,
    /// Derived summary list; the general_progress record is first by convention.
    pub computed_summary: Vec<Value>,
}

/// Snapshot store backed by SQLite
pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    /// Open or create a snapshot store at the given path
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open the store in read-only mode (for the query-only CLI commands)
    pub fn open_readonly(db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.set_prepared_statement_cache_capacity(4);
        Ok(Self { conn })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                run_timestamp TEXT NOT NULL,
                raw_entities TEXT NOT NULL,
                computed_summary TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_user_course
                ON snapshots(user_id, course_id, run_timestamp);
            "#,
        )?;
        Ok(())
    }

    /// Append one snapshot and return its id.
    ///
    /// This is the only mutating operation in the store; there is no
    /// update path by design.
    pub fn insert(
        &self,
        user_id: &str,
        course_id: &str,
        run_timestamp: DateTime<Utc>,
        raw_entities: &[Value],
        computed_summary: &[Value],
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO snapshots (user_id, course_id, run_timestamp, raw_entities, computed_summary)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                user_id,
                course_id,
                run_timestamp.to_rfc3339(),
                serde_json::to_string(raw_entities)?,
                serde_json::to_string(computed_summary)?,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent snapshot for a (user, course) pair, if any.
    pub fn query_latest(&self, user_id: &str, course_id: &str) -> Result<Option<SnapshotRecord>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT id, user_id, course_id, run_timestamp, raw_entities, computed_summary
            FROM snapshots
            WHERE user_id = ?1 AND course_id = ?2
            ORDER BY run_timestamp DESC, id DESC
            LIMIT 1
            "#,
        )?;

        let mut rows = stmt.query(params![user_id, course_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    /// Full history for a (user, course) pair, oldest first.
    /// Ties on run_timestamp are broken by insertion order.
    pub fn query_history(&self, user_id: &str, course_id: &str) -> Result<Vec<SnapshotRecord>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT id, user_id, course_id, run_timestamp, raw_entities, computed_summary
            FROM snapshots
            WHERE user_id = ?1 AND course_id = ?2
            ORDER BY run_timestamp ASC, id ASC
            "#,
        )?;

        // JSON and timestamp decoding happens outside query_map so those
        // errors surface as anyhow errors, not rusqlite ones.
        let records = stmt.query_map(params![user_id, course_id], raw_row)?;

        let mut history = Vec::new();
        for raw in records {
            history.push(decode_record(raw?)?);
        }
        Ok(history)
    }

    /// Snapshot count for one (user, course) pair.
    pub fn count(&self, user_id: &str, course_id: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM snapshots WHERE user_id = ?1 AND course_id = ?2",
                params![user_id, course_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Total snapshot count across all users and courses.
    pub fn count_all(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Distinct (user, course) pairs with at least one snapshot.
    pub fn tracked_pairs(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT user_id, course_id FROM snapshots ORDER BY user_id, course_id",
        )?;
        let pairs = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        pairs.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

type RawRow = (i64, String, String, String, String, String);

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_record(raw: RawRow) -> Result<SnapshotRecord> {
    let (id, user_id, course_id, timestamp, raw_entities, computed_summary) = raw;
    Ok(SnapshotRecord {
        id,
        user_id,
        course_id,
        run_timestamp: DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc),
        raw_entities: serde_json::from_str(&raw_entities)?,
        computed_summary: serde_json::from_str(&computed_summary)?,
    })
}

fn row_to_record(row: &Row<'_>) -> Result<SnapshotRecord> {
    decode_record(raw_row(row)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 10, 0, 0).unwrap()
    }

    #[test]
    fn insert_and_query_roundtrip() -> Result<()> {
        let temp = NamedTempFile::new()?;
        let store = SnapshotStore::open(temp.path())?;

        let raw = vec![json!({"topic": "1.1", "prob": 0.8})];
        let summary = vec![json!({"general_progress": 0.8})];
        let id = store.insert("u1", "oge-math", ts(1), &raw, &summary)?;
        assert!(id > 0);

        let latest = store.query_latest("u1", "oge-math")?.unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.raw_entities, raw);
        assert_eq!(latest.computed_summary, summary);
        assert_eq!(latest.run_timestamp, ts(1));

        assert!(store.query_latest("u1", "ege-math")?.is_none());
        Ok(())
    }

    #[test]
    fn history_is_ordered_and_append_only() -> Result<()> {
        let temp = NamedTempFile::new()?;
        let store = SnapshotStore::open(temp.path())?;

        store.insert("u1", "c1", ts(2), &[], &[])?;
        store.insert("u1", "c1", ts(1), &[], &[])?;
        let before = store.query_history("u1", "c1")?;
        assert_eq!(before.len(), 2);
        assert!(before[0].run_timestamp < before[1].run_timestamp);

        store.insert("u1", "c1", ts(3), &[], &[])?;
        let after = store.query_history("u1", "c1")?;
        assert_eq!(after.len(), 3);
        // Previously returned records are unchanged.
        for (old, new) in before.iter().zip(after.iter()) {
            assert_eq!(old.id, new.id);
            assert_eq!(old.run_timestamp, new.run_timestamp);
        }
        Ok(())
    }

    #[test]
    fn identical_timestamps_keep_insertion_order() -> Result<()> {
        let temp = NamedTempFile::new()?;
        let store = SnapshotStore::open(temp.path())?;

        let first = store.insert("u1", "c1", ts(5), &[json!({"general_progress": 0.1})], &[])?;
        let second = store.insert("u1", "c1", ts(5), &[json!({"general_progress": 0.2})], &[])?;

        let history = store.query_history("u1", "c1")?;
        assert_eq!(history[0].id, first);
        assert_eq!(history[1].id, second);

        let latest = store.query_latest("u1", "c1")?.unwrap();
        assert_eq!(latest.id, second);
        Ok(())
    }
}
