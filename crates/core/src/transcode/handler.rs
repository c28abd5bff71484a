//! Queue handler that drives transcode runs.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::queue::{Interrupted, QueueError, TaskHandler, TaskMessage, TaskQueue};

use super::error::TranscodeError;
use super::orchestrator::TranscodeOrchestrator;

/// Payload of a transcode task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodePayload {
    pub video_id: String,
}

/// Runs the pipeline for each delivered transcode task.
///
/// The task id is the claim on the video, so a redelivery after a crash
/// takes over its own abandoned claim. A delivery for a video held by
/// another live run, or already done, succeeds without doing anything. A
/// run cut short by shutdown is reported as [`Interrupted`]. Any other
/// failure is returned so the queue retries the task.
pub struct TranscodeTaskHandler {
    orchestrator: Arc<TranscodeOrchestrator>,
}

impl TranscodeTaskHandler {
    pub fn new(orchestrator: Arc<TranscodeOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl TaskHandler for TranscodeTaskHandler {
    async fn handle(&self, task: &TaskMessage) -> anyhow::Result<()> {
        let payload: TranscodePayload = serde_json::from_value(task.payload.clone())
            .with_context(|| format!("invalid transcode payload for task {}", task.id))?;

        match self
            .orchestrator
            .run_claimed(&payload.video_id, &task.id)
            .await
        {
            Ok(report) => {
                info!(
                    task_id = %task.id,
                    video_id = %payload.video_id,
                    renditions = report.renditions.len(),
                    "Transcode task done"
                );
                Ok(())
            }
            Err(TranscodeError::AlreadyProcessing(video_id)) => {
                info!(task_id = %task.id, video_id = %video_id, "Duplicate transcode delivery ignored");
                Ok(())
            }
            Err(e @ TranscodeError::ShuttingDown(_)) => Err(Interrupted::new(e.to_string()).into()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Enqueue a transcode task for `video_id` under the configured task type.
pub async fn enqueue_transcode(
    queue: &TaskQueue,
    task_type: &str,
    video_id: &str,
) -> Result<TaskMessage, QueueError> {
    let payload = TranscodePayload {
        video_id: video_id.to_string(),
    };
    queue
        .enqueue(task_type, &payload, uuid::Uuid::new_v4().to_string())
        .await
}
