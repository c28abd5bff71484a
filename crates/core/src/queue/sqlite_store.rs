//! SQLite-backed task store implementation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::error::TaskStoreError;
use super::store::{TaskFilter, TaskStore};
use super::types::{TaskMessage, TaskStatus};

const SELECT_COLUMNS: &str = "id, task_type, payload, status, retry_count, max_retries, last_error, next_retry_at, created_at, updated_at, source, replay_of";

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Create a new SQLite task store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TaskStoreError> {
        let conn = Connection::open(path).map_err(|e| TaskStoreError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| TaskStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite task store (useful for testing).
    pub fn in_memory() -> Result<Self, TaskStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| TaskStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TaskStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                task_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                last_error TEXT,
                next_retry_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                source TEXT NOT NULL,
                replay_of TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_type ON tasks(task_type);
            "#,
        )
        .map_err(|e| TaskStoreError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, TaskStoreError> {
        self.conn
            .lock()
            .map_err(|_| TaskStoreError::Database("task store lock poisoned".to_string()))
    }

    fn parse_time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskMessage> {
        let payload_json: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let next_retry_at: Option<String> = row.get(7)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;

        let status = status_str.parse::<TaskStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::<dyn std::error::Error + Send + Sync>::from(e),
            )
        })?;

        Ok(TaskMessage {
            id: row.get(0)?,
            task_type: row.get(1)?,
            payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
            status,
            retry_count: row.get(4)?,
            max_retries: row.get(5)?,
            last_error: row.get(6)?,
            next_retry_at: next_retry_at.as_deref().map(Self::parse_time),
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
            source: row.get(10)?,
            replay_of: row.get(11)?,
        })
    }

    fn build_where_clause(filter: &TaskFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref task_type) = filter.task_type {
            conditions.push("task_type = ?");
            params.push(Box::new(task_type.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<TaskMessage>, TaskStoreError> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?", SELECT_COLUMNS);
        match conn.query_row(&sql, params![id], Self::row_to_task) {
            Ok(task) => Ok(Some(task)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TaskStoreError::Database(e.to_string())),
        }
    }
}

impl TaskStore for SqliteTaskStore {
    fn insert(&self, task: &TaskMessage) -> Result<bool, TaskStoreError> {
        let conn = self.conn()?;
        let payload_json = serde_json::to_string(&task.payload)
            .map_err(|e| TaskStoreError::Database(e.to_string()))?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tasks (id, task_type, payload, status, retry_count, max_retries, last_error, next_retry_at, created_at, updated_at, source, replay_of) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                task.id,
                task.task_type,
                payload_json,
                task.status.as_str(),
                task.retry_count,
                task.max_retries,
                task.last_error,
                task.next_retry_at.map(|t| t.to_rfc3339()),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                task.source,
                task.replay_of,
            ],
        )
        .map_err(|e| TaskStoreError::Database(e.to_string()))?;

        Ok(inserted > 0)
    }

    fn get(&self, id: &str) -> Result<Option<TaskMessage>, TaskStoreError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn update(&self, task: &TaskMessage) -> Result<(), TaskStoreError> {
        let conn = self.conn()?;

        let changed = conn
            .execute(
                r#"
                UPDATE tasks SET status = ?, retry_count = ?, last_error = ?, next_retry_at = ?, updated_at = ?
                WHERE id = ?
                  AND status NOT IN ('completed', 'failed')
                  AND retry_count <= ?
                "#,
                params![
                    task.status.as_str(),
                    task.retry_count,
                    task.last_error,
                    task.next_retry_at.map(|t| t.to_rfc3339()),
                    task.updated_at.to_rfc3339(),
                    task.id,
                    task.retry_count,
                ],
            )
            .map_err(|e| TaskStoreError::Database(e.to_string()))?;

        if changed > 0 {
            return Ok(());
        }

        match Self::fetch(&conn, &task.id)? {
            None => Err(TaskStoreError::NotFound(task.id.clone())),
            Some(current) if current.status.is_terminal() => Err(TaskStoreError::Conflict {
                id: task.id.clone(),
                reason: format!("row is already {}", current.status),
            }),
            Some(current) => Err(TaskStoreError::Conflict {
                id: task.id.clone(),
                reason: format!(
                    "retry count would decrease from {} to {}",
                    current.retry_count, task.retry_count
                ),
            }),
        }
    }

    fn delete(&self, id: &str) -> Result<bool, TaskStoreError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM tasks WHERE id = ?", params![id])
            .map_err(|e| TaskStoreError::Database(e.to_string()))?;
        Ok(deleted > 0)
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskMessage>, TaskStoreError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM tasks {} ORDER BY created_at ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TaskStoreError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_task)
            .map_err(|e| TaskStoreError::Database(e.to_string()))?;

        let mut tasks = Vec::new();
        for row_result in rows {
            tasks.push(row_result.map_err(|e| TaskStoreError::Database(e.to_string()))?);
        }
        Ok(tasks)
    }

    fn count_by_status(&self) -> Result<HashMap<TaskStatus, i64>, TaskStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .map_err(|e| TaskStoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| TaskStoreError::Database(e.to_string()))?;

        let mut counts = HashMap::new();
        for row_result in rows {
            let (status, count) = row_result.map_err(|e| TaskStoreError::Database(e.to_string()))?;
            if let Ok(status) = status.parse::<TaskStatus>() {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::types::DEFAULT_MAX_RETRIES;

    fn task(id: &str) -> TaskMessage {
        TaskMessage::new(
            id,
            "video.transcode",
            serde_json::json!({ "videoId": id }),
            DEFAULT_MAX_RETRIES,
            "media",
        )
    }

    #[test]
    fn test_insert_and_get() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let original = task("t1");
        store.insert(&original).unwrap();

        let loaded = store.get("t1").unwrap().unwrap();
        assert_eq!(loaded.id, "t1");
        assert_eq!(loaded.task_type, "video.transcode");
        assert_eq!(loaded.payload, original.payload);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.max_retries, 3);
        assert_eq!(loaded.source, "media");
    }

    #[test]
    fn test_get_missing() {
        let store = SqliteTaskStore::in_memory().unwrap();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_update_retry_transition() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let mut t = task("t1");
        store.insert(&t).unwrap();

        t.prepare_retry("boom", Utc::now());
        store.update(&t).unwrap();

        let loaded = store.get("t1").unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Retrying);
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("boom"));
        assert!(loaded.next_retry_at.is_some());
    }

    #[test]
    fn test_update_rejects_terminal_row() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let mut t = task("t1");
        store.insert(&t).unwrap();

        t.mark_completed(Utc::now());
        store.update(&t).unwrap();

        t.status = TaskStatus::Processing;
        let err = store.update(&t).unwrap_err();
        assert!(matches!(err, TaskStoreError::Conflict { .. }));
        assert_eq!(store.get("t1").unwrap().unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_update_rejects_lower_retry_count() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let mut t = task("t1");
        t.prepare_retry("boom", Utc::now());
        t.prepare_retry("boom", Utc::now());
        store.insert(&t).unwrap();

        t.retry_count = 1;
        let err = store.update(&t).unwrap_err();
        assert!(matches!(err, TaskStoreError::Conflict { .. }));
    }

    #[test]
    fn test_update_missing_row() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let err = store.update(&task("ghost")).unwrap_err();
        assert!(matches!(err, TaskStoreError::NotFound(_)));
    }

    #[test]
    fn test_insert_keeps_existing_row() {
        let store = SqliteTaskStore::in_memory().unwrap();
        let mut t = task("t1");
        t.mark_unroutable("no handler", Utc::now());
        assert!(store.insert(&t).unwrap());

        assert!(!store.insert(&task("t1")).unwrap());
        let loaded = store.get("t1").unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert_eq!(loaded.last_error.as_deref(), Some("no handler"));
    }

    #[test]
    fn test_replay_link_persists() {
        let store = SqliteTaskStore::in_memory().unwrap();
        store.insert(&task("t2").with_replay_of("t1")).unwrap();
        assert_eq!(
            store.get("t2").unwrap().unwrap().replay_of.as_deref(),
            Some("t1")
        );
    }

    #[test]
    fn test_delete() {
        let store = SqliteTaskStore::in_memory().unwrap();
        store.insert(&task("t1")).unwrap();
        assert!(store.delete("t1").unwrap());
        assert!(!store.delete("t1").unwrap());
    }

    #[test]
    fn test_list_and_count() {
        let store = SqliteTaskStore::in_memory().unwrap();
        store.insert(&task("a")).unwrap();
        store.insert(&task("b")).unwrap();
        let mut failed = task("c");
        failed.mark_unroutable("x", Utc::now());
        store.insert(&failed).unwrap();

        let pending = store
            .list(&TaskFilter::new().with_status(TaskStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 2);

        let by_type = store
            .list(&TaskFilter::new().with_task_type("other"))
            .unwrap();
        assert!(by_type.is_empty());

        let counts = store.count_by_status().unwrap();
        assert_eq!(counts.get(&TaskStatus::Pending), Some(&2));
        assert_eq!(counts.get(&TaskStatus::Failed), Some(&1));
        assert_eq!(counts.get(&TaskStatus::Completed), None);
    }
}
