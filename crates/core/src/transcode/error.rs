//! Error types for the transcode pipeline.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::events::PublishError;
use crate::media::MediaToolError;
use crate::storage::StorageError;
use crate::video::VideoStoreError;

/// Pipeline step names, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeStep {
    Start,
    Download,
    Probe,
    Moderation,
    Cover,
    Normalize,
    Encode,
    Upload,
    Complete,
    Persist,
    Notify,
}

impl TranscodeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeStep::Start => "start",
            TranscodeStep::Download => "download",
            TranscodeStep::Probe => "probe",
            TranscodeStep::Moderation => "moderation",
            TranscodeStep::Cover => "cover",
            TranscodeStep::Normalize => "normalize",
            TranscodeStep::Encode => "encode",
            TranscodeStep::Upload => "upload",
            TranscodeStep::Complete => "complete",
            TranscodeStep::Persist => "persist",
            TranscodeStep::Notify => "notify",
        }
    }
}

impl fmt::Display for TranscodeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of a step failure.
#[derive(Debug, Error)]
pub enum StepCause {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("tool error: {0}")]
    Tool(#[from] MediaToolError),

    #[error("database error: {0}")]
    Database(#[from] VideoStoreError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no renditions produced")]
    NoRenditions,

    #[error("cancelled")]
    Cancelled,
}

impl StepCause {
    pub fn is_cancelled(&self) -> bool {
        match self {
            StepCause::Cancelled => true,
            StepCause::Tool(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// A failed step with its video and cause.
#[derive(Debug, Error)]
#[error("video {video_id}: {step} failed: {cause}")]
pub struct StepError {
    pub video_id: String,
    pub step: TranscodeStep,
    pub cause: StepCause,
}

impl StepError {
    pub fn new(video_id: &str, step: TranscodeStep, cause: impl Into<StepCause>) -> Self {
        Self {
            video_id: video_id.to_string(),
            step,
            cause: cause.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause.is_cancelled()
    }
}

/// Errors returned by the orchestrator.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Another run holds the video, or it already completed.
    #[error("video {0} is not pending or failed; run not started")]
    AlreadyProcessing(String),

    #[error("video not found: {0}")]
    VideoNotFound(String),

    #[error("database error: {0}")]
    Database(VideoStoreError),

    /// A hard step failure ended the run.
    #[error(transparent)]
    Step(#[from] StepError),

    #[error("transcode of video {0} cancelled")]
    Cancelled(String),

    /// Shutdown began before or during the run. Any claim was released.
    #[error("transcode of video {0} interrupted by shutdown")]
    ShuttingDown(String),

    /// The run's task panicked or was aborted.
    #[error("transcode worker for video {video_id} ended abnormally: {reason}")]
    Aborted { video_id: String, reason: String },
}
