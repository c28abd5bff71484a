//! Task handler trait.

use async_trait::async_trait;
use thiserror::Error;

use super::types::TaskMessage;

/// Runs the work described by a task message.
///
/// Returning `Err` counts as a failed attempt and schedules a retry (or a
/// dead letter once the budget is spent). Handlers must tolerate being
/// invoked more than once for the same message.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskMessage) -> anyhow::Result<()>;
}

/// Handler error for an attempt cut short by shutdown.
///
/// The queue does not charge the attempt: the row goes back to its previous
/// status and the record stays uncommitted for redelivery.
#[derive(Debug, Error)]
#[error("attempt interrupted: {reason}")]
pub struct Interrupted {
    pub reason: String,
}

impl Interrupted {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Whether a handler error is (or wraps) an interruption.
    pub fn is_interruption(error: &anyhow::Error) -> bool {
        error.chain().any(|cause| cause.is::<Interrupted>())
    }
}
