//! Task storage trait and types.

use std::collections::HashMap;

use super::error::TaskStoreError;
use super::types::{TaskMessage, TaskStatus};

/// Filter for querying task rows.
#[derive(Debug, Clone)]
pub struct TaskFilter {
    /// Filter by status.
    pub status: Option<TaskStatus>,
    /// Filter by task type.
    pub task_type: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            task_type: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Durable per-task record.
///
/// The row is authoritative over any copy carried on a stream: consumers
/// read it before dispatch and write every transition back.
pub trait TaskStore: Send + Sync {
    /// Insert a fresh row. Returns `false` without writing anything if a
    /// row with the same id already exists.
    fn insert(&self, task: &TaskMessage) -> Result<bool, TaskStoreError>;

    /// Get a task by id.
    fn get(&self, id: &str) -> Result<Option<TaskMessage>, TaskStoreError>;

    /// Persist a transition of an existing row.
    ///
    /// Rejected with `Conflict` if the stored row is terminal or if the
    /// update would lower `retry_count`.
    fn update(&self, task: &TaskMessage) -> Result<(), TaskStoreError>;

    /// Remove a row. Returns whether a row existed.
    fn delete(&self, id: &str) -> Result<bool, TaskStoreError>;

    /// List tasks matching a filter, oldest first.
    fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskMessage>, TaskStoreError>;

    /// Count rows per status.
    fn count_by_status(&self) -> Result<HashMap<TaskStatus, i64>, TaskStoreError>;
}
