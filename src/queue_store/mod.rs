//! The Durable Queue Store (§4.1): a single SQLite file per task holding
//! the four named queues as tables with FIFO semantics by ascending `id`.
//!
//! Grounded on the teacher agent's `database::Database` — a pooled
//! `rusqlite` connection with a `setup()` that issues `CREATE TABLE IF NOT
//! EXISTS` for every table it owns — but the pop/ack/restore protocol below
//! has no teacher analog; it is modeled directly on the original system's
//! `persistqueue.SQLiteQueue`/`UniqueQ` `auto_commit=False` + `task_done()`
//! pattern (see `queue_item_management.py`), reimplemented over a plain
//! table instead of a vendored queue library.

mod error;

pub use error::{Error, ErrorKind, Result};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

use crate::types::QueueName;

const ALL_QUEUES: [QueueName; 4] = [
    QueueName::Inputs,
    QueueName::Successes,
    QueueName::Failures,
    QueueName::InputsWithoutOutput,
];

/// One row read back from a queue table (§3 "Queue item").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub data: Value,
    pub added_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub items: Vec<QueueItem>,
    pub next_cursor: Option<i64>,
    pub total: i64,
}

/// A task's durable queue-store file, plus the in-memory record of which
/// rows have been popped but not yet `ack`'d or `restore`'d.
///
/// The "deferred commit" semantics of §4.1 are implemented by *not*
/// deleting a row at `pop_next` time at all: the row stays physically
/// present in the table (so external readers/pagers still see it, and a
/// crash before `ack` leaves it exactly where it was) while this struct
/// remembers its id as "pending removal". `ack` performs the actual
/// `DELETE`; `restore` simply forgets the pending ids.
pub struct QueueStore {
    pool: Pool<SqliteConnectionManager>,
    pending: Mutex<HashMap<QueueName, Vec<i64>>>,
}

impl QueueStore {
    /// Opens (creating if necessary) the queue-store file for one task.
    pub fn open(dir: &Path, task_id: i64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{task_id}.db"));
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(4).build(manager)?;
        let store = QueueStore {
            pool,
            pending: Mutex::new(HashMap::new()),
        };
        store.setup()?;
        Ok(store)
    }

    fn setup(&self) -> Result<()> {
        let conn = self.pool.get()?;
        for queue in ALL_QUEUES {
            let unique = if queue == QueueName::Inputs { "UNIQUE" } else { "" };
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    _id INTEGER PRIMARY KEY AUTOINCREMENT,
                    data TEXT NOT NULL {unique},
                    timestamp INTEGER NOT NULL
                );",
                table = queue.table_name(),
            ))?;
        }
        Ok(())
    }

    /// Inserts a payload; for the `inputs` queue a duplicate payload is
    /// silently ignored (§4.1 "append").
    pub fn append(&self, queue: QueueName, payload: &Value) -> Result<()> {
        let conn = self.pool.get()?;
        let data = serde_json::to_string(payload).map_err(ErrorKind::Serialize)?;
        let now = Utc::now().timestamp();
        let sql = if queue == QueueName::Inputs {
            format!(
                "INSERT OR IGNORE INTO {} (data, timestamp) VALUES (?1, ?2)",
                queue.table_name()
            )
        } else {
            format!(
                "INSERT INTO {} (data, timestamp) VALUES (?1, ?2)",
                queue.table_name()
            )
        };
        conn.execute(&sql, params![data, now])?;
        Ok(())
    }

    /// Returns (without removing) the lowest-id row not already pending
    /// removal.
    pub fn peek_next(&self, queue: QueueName) -> Result<Option<QueueItem>> {
        let pending = self.pending.lock().unwrap();
        let excluded = pending.get(&queue).cloned().unwrap_or_default();
        drop(pending);
        self.select_next_excluding(queue, &excluded)
    }

    /// Returns the lowest-id row not already pending removal, and marks it
    /// pending; the actual delete is deferred until `ack`.
    pub fn pop_next(&self, queue: QueueName) -> Result<Option<QueueItem>> {
        let mut pending = self.pending.lock().unwrap();
        let excluded = pending.get(&queue).cloned().unwrap_or_default();
        let item = self.select_next_excluding(queue, &excluded)?;
        if let Some(ref item) = item {
            pending.entry(queue).or_default().push(item.id);
        }
        Ok(item)
    }

    fn select_next_excluding(&self, queue: QueueName, excluded: &[i64]) -> Result<Option<QueueItem>> {
        let conn = self.pool.get()?;
        let placeholders = excluded
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = if excluded.is_empty() {
            format!(
                "SELECT _id, data, timestamp FROM {} ORDER BY _id ASC LIMIT 1",
                queue.table_name()
            )
        } else {
            format!(
                "SELECT _id, data, timestamp FROM {} WHERE _id NOT IN ({}) ORDER BY _id ASC LIMIT 1",
                queue.table_name(),
                placeholders
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = if excluded.is_empty() {
            stmt.query([])?
        } else {
            let params: Vec<&dyn rusqlite::ToSql> =
                excluded.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
            stmt.query(params.as_slice())?
        };
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_item(row)?))
        } else {
            Ok(None)
        }
    }

    /// Commits every removal recorded since the previous `ack`/`restore`.
    pub fn ack(&self, queue: QueueName) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        let ids = pending.remove(&queue).unwrap_or_default();
        drop(pending);
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.pool.get()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM {} WHERE _id IN ({})", queue.table_name(), placeholders);
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        conn.execute(&sql, params.as_slice())?;
        Ok(())
    }

    /// Discards uncommitted removals, rolling popped-but-unacked rows back
    /// into the queue (used after a Fatal error, §4.2).
    pub fn restore(&self, queue: QueueName) {
        self.pending.lock().unwrap().remove(&queue);
    }

    pub fn page(&self, queue: QueueName, cursor_id: Option<i64>, limit: i64) -> Result<Page> {
        let conn = self.pool.get()?;
        let table = queue.table_name();

        let mut stmt = if cursor_id.is_some() {
            conn.prepare(&format!(
                "SELECT _id, data, timestamp FROM {table} WHERE _id >= ?1 ORDER BY _id ASC LIMIT ?2"
            ))?
        } else {
            conn.prepare(&format!(
                "SELECT _id, data, timestamp FROM {table} ORDER BY _id ASC LIMIT ?1"
            ))?
        };

        let rows = if let Some(cursor) = cursor_id {
            stmt.query_map(params![cursor, limit], row_to_item)?
        } else {
            stmt.query_map(params![limit], row_to_item)?
        };

        let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        let next_cursor = if let Some(last) = items.last() {
            conn.query_row(
                &format!("SELECT _id FROM {table} WHERE _id > ?1 ORDER BY _id ASC LIMIT 1"),
                params![last.id],
                |row| row.get::<_, i64>(0),
            )
            .ok()
        } else {
            None
        };

        let total: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;

        Ok(Page {
            items,
            next_cursor,
            total,
        })
    }

    /// Unconditional deletion by explicit id; returns the number removed.
    pub fn delete_by_ids(&self, queue: QueueName, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.pool.get()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "DELETE FROM {} WHERE _id IN ({})",
            queue.table_name(),
            placeholders
        );
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let count = conn.execute(&sql, params.as_slice())?;
        Ok(count as u64)
    }

    pub fn count(&self, queue: QueueName) -> Result<i64> {
        let conn = self.pool.get()?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", queue.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let id: i64 = row.get(0)?;
    let raw: String = row.get(1)?;
    let ts: i64 = row.get(2)?;
    let data: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
    let added_at = chrono::DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now);
    Ok(QueueItem { id, data, added_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, QueueStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open(dir.path(), 1).unwrap();
        (dir, store)
    }

    #[test]
    fn append_dedups_inputs_only() {
        let (_dir, store) = temp_store();
        store.append(QueueName::Inputs, &json!(1)).unwrap();
        store.append(QueueName::Inputs, &json!(1)).unwrap();
        assert_eq!(store.count(QueueName::Inputs).unwrap(), 1);

        store.append(QueueName::Successes, &json!(1)).unwrap();
        store.append(QueueName::Successes, &json!(1)).unwrap();
        assert_eq!(store.count(QueueName::Successes).unwrap(), 2);
    }

    #[test]
    fn pop_defers_removal_until_ack() {
        let (_dir, store) = temp_store();
        store.append(QueueName::Inputs, &json!(1)).unwrap();

        let popped = store.pop_next(QueueName::Inputs).unwrap().unwrap();
        assert_eq!(popped.data, json!(1));
        // Row is still physically present until ack.
        assert_eq!(store.count(QueueName::Inputs).unwrap(), 1);

        store.ack(QueueName::Inputs).unwrap();
        assert_eq!(store.count(QueueName::Inputs).unwrap(), 0);
    }

    #[test]
    fn restore_rolls_back_pop() {
        let (_dir, store) = temp_store();
        store.append(QueueName::Inputs, &json!(1)).unwrap();
        store.pop_next(QueueName::Inputs).unwrap().unwrap();
        store.restore(QueueName::Inputs);

        // The item should be poppable again.
        let popped = store.pop_next(QueueName::Inputs).unwrap().unwrap();
        assert_eq!(popped.data, json!(1));
        assert_eq!(store.count(QueueName::Inputs).unwrap(), 1);
    }

    #[test]
    fn pop_excludes_already_pending_items() {
        let (_dir, store) = temp_store();
        store.append(QueueName::Inputs, &json!(1)).unwrap();
        store.append(QueueName::Inputs, &json!(2)).unwrap();

        let first = store.pop_next(QueueName::Inputs).unwrap().unwrap();
        let second = store.pop_next(QueueName::Inputs).unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert!(store.pop_next(QueueName::Inputs).unwrap().is_none());
    }

    #[test]
    fn page_returns_next_cursor_and_total() {
        let (_dir, store) = temp_store();
        for i in 0..5 {
            store.append(QueueName::Inputs, &json!(i)).unwrap();
        }
        let page = store.page(QueueName::Inputs, None, 2).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 5);
        assert!(page.next_cursor.is_some());

        let next_page = store
            .page(QueueName::Inputs, page.next_cursor, 2)
            .unwrap();
        assert_eq!(next_page.items.len(), 2);
    }

    #[test]
    fn delete_by_ids_removes_unconditionally() {
        let (_dir, store) = temp_store();
        store.append(QueueName::Inputs, &json!(1)).unwrap();
        let page = store.page(QueueName::Inputs, None, 10).unwrap();
        let id = page.items[0].id;

        let removed = store.delete_by_ids(QueueName::Inputs, &[id]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(QueueName::Inputs).unwrap(), 0);
    }
}
