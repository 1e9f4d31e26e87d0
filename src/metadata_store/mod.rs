//! The Task Metadata Store (§4.7): the canonical `task` / `upload_record`
//! tables, backed by their own pooled `rusqlite` connection.
//!
//! Grounded on the teacher's `database::Database` — pooled
//! `r2d2::Pool<SqliteConnectionManager>`, `CREATE TABLE IF NOT EXISTS`
//! setup, and a `PRAGMA user_version`-tracked migration runner driven by
//! `harvestd_migrations::Migrations::get_all()` in place of
//! `pennsieve_migrations`.

mod error;

pub use error::{Error, ErrorKind, Result};

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use crate::types::{DataSource, TaskId, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub data_source: DataSource,
    pub task_type: String,
    pub params: Option<Value>,
    pub status: TaskStatus,
    pub s3_prefix: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub id: i64,
    pub task_id: TaskId,
    pub s3_key: String,
    pub s3_bucket: String,
    pub s3_endpoint_url: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// New task fields supplied by `create_task` (§6); everything else is
/// filled in by the store.
pub struct NewTask {
    pub data_source: DataSource,
    pub task_type: String,
    pub params: Option<Value>,
    pub s3_prefix: String,
}

/// A page of tasks ordered by `created_at desc` (§6 `list_tasks`).
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub next_cursor: Option<TaskId>,
}

#[derive(Clone)]
pub struct MetadataStore {
    pool: Pool<SqliteConnectionManager>,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::new(manager)?;
        let store = MetadataStore { pool };
        store.setup()?;
        Ok(store)
    }

    fn setup(&self) -> Result<()> {
        let conn = self.pool.get()?;
        Self::run_migrations(&conn)?;
        Ok(())
    }

    fn schema_version(conn: &rusqlite::Connection) -> Result<usize> {
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))? as usize)
    }

    fn set_schema_version(conn: &rusqlite::Connection, version: usize) -> Result<()> {
        conn.pragma_update(None, "user_version", version as i64)?;
        Ok(())
    }

    /// Runs every migration in `harvestd_migrations::Migrations::get_all()`
    /// whose index is at or past the schema's current `user_version`,
    /// mirroring the teacher's `Database::run_migrations`.
    fn run_migrations(conn: &rusqlite::Connection) -> Result<()> {
        for (i, (filename, contents)) in harvestd_migrations::Migrations::get_all().enumerate() {
            let current_version = Self::schema_version(conn)?;
            if current_version <= i {
                log::debug!("MIGRATION: running {filename}@{i}");
                conn.execute_batch(contents.as_ref()).map_err(|e| {
                    ErrorKind::migration(current_version, e.to_string(), contents.to_string())
                })?;
                Self::set_schema_version(conn, i + 1)?;
            }
        }
        Ok(())
    }

    pub fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let conn = self.pool.get()?;
        let now = Utc::now();
        let params_text = new_task
            .params
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(ErrorKind::from)?;

        conn.execute(
            "INSERT INTO task (data_source, task_type, params, status, s3_prefix, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new_task.data_source.as_str(),
                new_task.task_type,
                params_text,
                TaskStatus::Paused.as_str(),
                new_task.s3_prefix,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        self.get_task(id)?.ok_or_else(|| ErrorKind::TaskNotFound(id).into())
    }

    pub fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, data_source, task_type, params, status, s3_prefix, created_at, updated_at
             FROM task WHERE id = ?1",
            params![id],
            row_to_task,
        )
        .optional()?
        .transpose()
    }

    pub fn require_task(&self, id: TaskId) -> Result<Task> {
        self.get_task(id)?.ok_or_else(|| ErrorKind::TaskNotFound(id).into())
    }

    pub fn list_tasks(&self, cursor: Option<TaskId>, limit: i64) -> Result<TaskPage> {
        let conn = self.pool.get()?;
        let mut stmt = if cursor.is_some() {
            conn.prepare(
                "SELECT id, data_source, task_type, params, status, s3_prefix, created_at, updated_at
                 FROM task WHERE id < ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?
        } else {
            conn.prepare(
                "SELECT id, data_source, task_type, params, status, s3_prefix, created_at, updated_at
                 FROM task ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?
        };

        let rows = if let Some(cursor) = cursor {
            stmt.query_map(params![cursor, limit], row_to_task)?
        } else {
            stmt.query_map(params![0, limit], row_to_task)?
        };

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row??);
        }

        let next_cursor = tasks.last().map(|t| t.id);
        Ok(TaskPage { tasks, next_cursor })
    }

    pub fn list_tasks_with_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
        let conn = self.pool.get()?;
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT id, data_source, task_type, params, status, s3_prefix, created_at, updated_at
             FROM task WHERE status IN ({placeholders}) ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let status_strs: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(status_strs.iter()), row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row??);
        }
        Ok(tasks)
    }

    /// Updates a task's status, bumping `updated_at` (§4.7).
    pub fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        let conn = self.pool.get()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE task SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, id],
        )?;
        if changed == 0 {
            return Err(ErrorKind::TaskNotFound(id).into());
        }
        Ok(())
    }

    /// Appends an upload record for `task_id` and bumps the task's
    /// `updated_at` (§3 "Upload record ... Append-only relative to its
    /// task; never rewritten").
    pub fn append_upload_record(
        &self,
        task_id: TaskId,
        s3_key: &str,
        s3_bucket: &str,
        s3_endpoint_url: &str,
        size_bytes: u64,
    ) -> Result<UploadRecord> {
        let conn = self.pool.get()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO upload_record (task_id, s3_key, s3_bucket, s3_endpoint_url, size_bytes, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![task_id, s3_key, s3_bucket, s3_endpoint_url, size_bytes as i64, now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE task SET updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), task_id],
        )?;

        Ok(UploadRecord {
            id,
            task_id,
            s3_key: s3_key.to_string(),
            s3_bucket: s3_bucket.to_string(),
            s3_endpoint_url: s3_endpoint_url.to_string(),
            size_bytes,
            uploaded_at: now,
        })
    }

    pub fn list_uploads(&self, task_id: TaskId) -> Result<Vec<UploadRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, s3_key, s3_bucket, s3_endpoint_url, size_bytes, uploaded_at
             FROM upload_record WHERE task_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![task_id], row_to_upload)?;
        let mut uploads = Vec::new();
        for row in rows {
            uploads.push(row??);
        }
        Ok(uploads)
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Task>> {
    let data_source_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;
    let params_text: Option<String> = row.get(3)?;
    let created_at_str: String = row.get(6)?;
    let updated_at_str: String = row.get(7)?;

    Ok((|| -> Result<Task> {
        let data_source = DataSource::from_str(&data_source_str)
            .map_err(ErrorKind::InvalidDataSource)?;
        let status =
            TaskStatus::from_str(&status_str).map_err(ErrorKind::InvalidTaskStatus)?;
        let params = params_text
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(ErrorKind::from)?;

        Ok(Task {
            id: row.get(0)?,
            data_source,
            task_type: row.get(2)?,
            params,
            status,
            s3_prefix: row.get(5)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .unwrap_or_else(|_| Utc::now().into())
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .unwrap_or_else(|_| Utc::now().into())
                .with_timezone(&Utc),
        })
    })())
}

fn row_to_upload(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<UploadRecord>> {
    let uploaded_at_str: String = row.get(6)?;
    let size_bytes: i64 = row.get(5)?;
    Ok(Ok(UploadRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        s3_key: row.get(2)?,
        s3_bucket: row.get(3)?,
        s3_endpoint_url: row.get(4)?,
        size_bytes: size_bytes as u64,
        uploaded_at: DateTime::parse_from_rfc3339(&uploaded_at_str)
            .unwrap_or_else(|_| Utc::now().into())
            .with_timezone(&Utc),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("metadata.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn create_and_get_round_trips() {
        let (_dir, store) = temp_store();
        let task = store
            .create_task(NewTask {
                data_source: DataSource::DummyApi,
                task_type: "echo".to_string(),
                params: None,
                s3_prefix: "prefix".to_string(),
            })
            .unwrap();
        assert_eq!(task.status, TaskStatus::Paused);

        let fetched = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.task_type, "echo");
    }

    #[test]
    fn update_status_bumps_updated_at() {
        let (_dir, store) = temp_store();
        let task = store
            .create_task(NewTask {
                data_source: DataSource::DummyApi,
                task_type: "echo".to_string(),
                params: None,
                s3_prefix: "prefix".to_string(),
            })
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.update_status(task.id, TaskStatus::Pending).unwrap();
        let updated = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Pending);
        assert!(updated.updated_at >= task.updated_at);
    }

    #[test]
    fn update_status_on_unknown_task_errors() {
        let (_dir, store) = temp_store();
        assert!(store.update_status(999, TaskStatus::Pending).is_err());
    }

    #[test]
    fn append_upload_record_is_listable() {
        let (_dir, store) = temp_store();
        let task = store
            .create_task(NewTask {
                data_source: DataSource::DummyApi,
                task_type: "echo".to_string(),
                params: None,
                s3_prefix: "prefix".to_string(),
            })
            .unwrap();

        store
            .append_upload_record(task.id, "k1", "bucket", "http://localhost:9000", 1024)
            .unwrap();
        store
            .append_upload_record(task.id, "k2", "bucket", "http://localhost:9000", 2048)
            .unwrap();

        let uploads = store.list_uploads(task.id).unwrap();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].s3_key, "k1");
        assert_eq!(uploads[1].s3_key, "k2");
    }

    #[test]
    fn list_tasks_with_status_filters() {
        let (_dir, store) = temp_store();
        let a = store
            .create_task(NewTask {
                data_source: DataSource::DummyApi,
                task_type: "echo".to_string(),
                params: None,
                s3_prefix: "prefix".to_string(),
            })
            .unwrap();
        store.update_status(a.id, TaskStatus::Running).unwrap();

        let _b = store
            .create_task(NewTask {
                data_source: DataSource::DummyApi,
                task_type: "echo".to_string(),
                params: None,
                s3_prefix: "prefix".to_string(),
            })
            .unwrap();

        let running = store
            .list_tasks_with_status(&[TaskStatus::Running, TaskStatus::Pending])
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, a.id);
    }
}
