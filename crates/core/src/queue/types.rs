//! Core task queue data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default retry budget for a freshly enqueued task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound of the retry backoff, in minutes.
pub const MAX_BACKOFF_MINUTES: i64 = 60;

/// Delivery status of a task message.
///
/// State machine flow:
/// ```text
/// Pending -> Processing -> Completed
///                |
///                v
///            Retrying -> Processing -> ...
///                |
///                v
///             Failed (dead-lettered)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Enqueued, not yet attempted.
    Pending,
    /// A handler is currently running for this message.
    Processing,
    /// Handler succeeded (terminal).
    Completed,
    /// Retry budget exhausted or no handler exists (terminal, dead-lettered).
    Failed,
    /// Waiting on the retry stream until `next_retry_at`.
    Retrying,
}

impl TaskStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Returns the status as stored in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "retrying" => Ok(TaskStatus::Retrying),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// What happens to a message after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish to the retry stream; eligible again at the given time.
    Retry { next_retry_at: DateTime<Utc> },
    /// Retry budget exhausted; route to the dead-letter stream.
    DeadLetter,
}

/// Backoff before retry attempt `attempt` (1-indexed):
/// `min(2^(attempt-1) minutes, 60 minutes)`.
pub fn retry_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let minutes = if exponent >= 6 {
        MAX_BACKOFF_MINUTES
    } else {
        (1i64 << exponent).min(MAX_BACKOFF_MINUTES)
    };
    Duration::minutes(minutes)
}

/// A generic unit of queued work.
///
/// This is the JSON wire shape carried on the task, retry and dead-letter
/// streams. The task store row with the same `id` is authoritative for
/// `status`, `retry_count` and `next_retry_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    /// Opaque identifier, typically the subject entity's id.
    pub id: String,

    /// Discriminates which handler runs this message.
    #[serde(rename = "type")]
    pub task_type: String,

    /// Opaque handler-specific body.
    pub payload: serde_json::Value,

    pub status: TaskStatus,

    /// Failed attempts so far. Never decreases.
    pub retry_count: u32,

    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Name of the producing service.
    pub source: String,

    /// Id of the dead-lettered task this message replays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_of: Option<String>,
}

impl TaskMessage {
    /// Wraps a payload into a fresh pending message.
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
        source: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_type: task_type.into(),
            payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            source: source.into(),
            replay_of: None,
        }
    }

    /// Links this message to the dead-lettered task it replays.
    pub fn with_replay_of(mut self, id: impl Into<String>) -> Self {
        self.replay_of = Some(id.into());
        self
    }

    /// Marks the message as being handled.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.updated_at = now;
    }

    /// Marks the message as successfully handled.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.next_retry_at = None;
        self.updated_at = now;
    }

    /// Records a failed attempt and decides whether to retry or dead-letter.
    ///
    /// Increments `retry_count` by exactly one. Once `retry_count` exceeds
    /// `max_retries` the message becomes `Failed`; otherwise it becomes
    /// `Retrying` with `next_retry_at = now + retry_backoff(retry_count)`.
    pub fn prepare_retry(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> RetryDecision {
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;

        if self.retry_count > self.max_retries {
            self.status = TaskStatus::Failed;
            self.next_retry_at = None;
            RetryDecision::DeadLetter
        } else {
            let next_retry_at = now + retry_backoff(self.retry_count);
            self.status = TaskStatus::Retrying;
            self.next_retry_at = Some(next_retry_at);
            RetryDecision::Retry { next_retry_at }
        }
    }

    /// Puts an interrupted attempt back to `previous` without charging it.
    pub fn mark_interrupted(&mut self, previous: TaskStatus, now: DateTime<Utc>) {
        self.status = previous;
        self.updated_at = now;
    }

    /// Marks the message as unrecoverable without consuming retry budget.
    pub fn mark_unroutable(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(reason.into());
        self.next_retry_at = None;
        self.updated_at = now;
    }

    /// Whether the message may be dispatched at `now`. Messages without a
    /// scheduled retry are always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.map_or(true, |at| now >= at)
    }
}
