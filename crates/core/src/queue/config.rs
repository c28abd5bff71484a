//! Task queue configuration.

use serde::{Deserialize, Serialize};

use super::broker::DEAD_LETTER_STREAM;
use super::types::DEFAULT_MAX_RETRIES;

/// Which stream a consumer loop reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// First-attempt deliveries.
    Tasks,
    /// Delayed redeliveries, gated on `next_retry_at`.
    Retry,
}

/// Configuration for the task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Service name; prefixes stream and consumer group names.
    #[serde(default = "default_service")]
    pub service: String,

    /// Retry budget stamped on newly enqueued messages.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long an idle consumer loop sleeps between polls (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum records fetched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Partitions per stream. One consumer loop runs per partition.
    #[serde(default = "default_partitions")]
    pub partitions: u32,
}

fn default_service() -> String {
    "mediaflow".to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_poll_interval() -> u64 {
    500
}

fn default_batch_size() -> usize {
    32
}

fn default_partitions() -> u32 {
    4
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval(),
            batch_size: default_batch_size(),
            partitions: default_partitions(),
        }
    }
}

impl QueueConfig {
    /// Create a config for the named service with defaults elsewhere.
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// `<service>.tasks`
    pub fn task_stream(&self) -> String {
        format!("{}.tasks", self.service)
    }

    /// `<service>.retry`
    pub fn retry_stream(&self) -> String {
        format!("{}.retry", self.service)
    }

    /// The process-wide dead-letter stream.
    pub fn dead_letter_stream(&self) -> &'static str {
        DEAD_LETTER_STREAM
    }

    pub fn stream_name(&self, kind: StreamKind) -> String {
        match kind {
            StreamKind::Tasks => self.task_stream(),
            StreamKind::Retry => self.retry_stream(),
        }
    }

    /// Consumer group shared by every worker of this service.
    pub fn consumer_group(&self) -> String {
        format!("{}-workers", self.service)
    }
}
