//! Error types for the task queue module.

use thiserror::Error;

use super::types::TaskStatus;

/// Errors raised by a stream broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The underlying log could not be read or written.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by a task store.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    /// Task row not found.
    #[error("task not found: {0}")]
    NotFound(String),

    /// Refused to mutate a terminal row or move `retry_count` backwards.
    #[error("rejected update of task {id}: {reason}")]
    Conflict { id: String, reason: String },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

/// Errors surfaced by the task queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Transport error (broker unreachable).
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Task store error.
    #[error("task store error: {0}")]
    Store(#[from] TaskStoreError),

    /// Payload or message could not be encoded.
    #[error("failed to encode task message: {0}")]
    Encode(#[from] serde_json::Error),

    /// No task with this id exists.
    #[error("task not found: {0}")]
    NotFound(String),

    /// A task with this id already has a row.
    #[error("task {id} already exists (status: {status})")]
    AlreadyExists { id: String, status: TaskStatus },

    /// Replay requested for a task that is not dead-lettered.
    #[error("task {id} is not dead-lettered (status: {status})")]
    NotDeadLettered { id: String, status: TaskStatus },
}
