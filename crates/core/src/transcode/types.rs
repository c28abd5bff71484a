//! Run handles and reports.

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::video::Rendition;

use super::error::{TranscodeError, TranscodeStep};

/// A logged, non-fatal step failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoftFailure {
    pub step: TranscodeStep,
    pub message: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeReport {
    pub video_id: String,
    pub duration_secs: f64,
    /// Uploaded renditions; the first is the main rendition.
    pub renditions: Vec<Rendition>,
    pub cover_key: Option<String>,
    pub soft_failures: Vec<SoftFailure>,
    pub elapsed_ms: u64,
}

impl TranscodeReport {
    pub fn main_rendition(&self) -> Option<&Rendition> {
        self.renditions.first()
    }

    pub fn soft_failed(&self, step: TranscodeStep) -> bool {
        self.soft_failures.iter().any(|f| f.step == step)
    }
}

/// Awaitable, cancellable handle to a spawned run.
pub struct RunHandle {
    video_id: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<TranscodeReport, TranscodeError>>,
}

impl RunHandle {
    pub(crate) fn new(
        video_id: String,
        cancel: CancellationToken,
        join: JoinHandle<Result<TranscodeReport, TranscodeError>>,
    ) -> Self {
        Self {
            video_id,
            cancel,
            join,
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// Request cancellation. The run stops at the next step boundary or
    /// kills its running subprocess, then ends `Failed`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<TranscodeReport, TranscodeError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(TranscodeError::Aborted {
                video_id: self.video_id,
                reason: e.to_string(),
            }),
        }
    }
}

/// Worker pool status.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub max_concurrent_runs: usize,
    pub active_runs: u64,
    pub queued_runs: u64,
    pub total_completed: u64,
    pub total_failed: u64,
}
