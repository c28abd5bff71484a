//! Reliable task queue.
//!
//! At-least-once delivery over a partitioned broker, with bounded
//! exponential-backoff retries and a dead-letter stream for messages that
//! exhaust their budget or have no handler.

mod broker;
mod config;
mod error;
mod handler;
mod sqlite_broker;
mod sqlite_store;
mod store;
mod task_queue;
mod types;

pub use broker::{partition_for, Broker, StreamRecord, DEAD_LETTER_STREAM};
pub use config::{QueueConfig, StreamKind};
pub use error::{BrokerError, QueueError, TaskStoreError};
pub use handler::{Interrupted, TaskHandler};
pub use sqlite_broker::SqliteBroker;
pub use sqlite_store::SqliteTaskStore;
pub use store::{TaskFilter, TaskStore};
pub use task_queue::{DispatchOutcome, QueueStatus, TaskCounts, TaskQueue};
pub use types::{retry_backoff, RetryDecision, TaskMessage, TaskStatus, DEFAULT_MAX_RETRIES, MAX_BACKOFF_MINUTES};
