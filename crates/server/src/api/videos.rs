//! Video API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use mediaflow_core::transcode::enqueue_transcode;
use mediaflow_core::{TranscodeStatus, Video};

use super::handlers::ErrorResponse;
use crate::state::AppState;

/// Response for an accepted transcode trigger
#[derive(Debug, Serialize)]
pub struct TranscodeAcceptedResponse {
    pub task_id: String,
    pub video_id: String,
    /// Status the video was in when the trigger arrived.
    pub previous_status: TranscodeStatus,
}

fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// The holder of a `processing` claim that nothing will ever finish: no run
/// for it in this process, and the claiming task is gone or terminal.
fn abandoned_claim<'a>(state: &AppState, video: &'a Video) -> Option<&'a str> {
    let claimant = video.claimed_by.as_deref()?;
    if state.orchestrator().is_running(&video.id) {
        return None;
    }
    match state.queue().store().get(claimant) {
        Ok(Some(task)) if !task.status.is_terminal() => None,
        Ok(_) => Some(claimant),
        Err(e) => {
            warn!(video_id = %video.id, claimant = %claimant, error = %e, "Could not look up claiming task");
            None
        }
    }
}

/// Enqueue a transcode for a video.
///
/// A completed or failed video is moved back to pending first, so the
/// queued run starts a fresh cycle. A video that is already processing is
/// rejected with 409, unless its claim is abandoned, in which case the
/// claim is released and a new run queued.
pub async fn trigger_transcode(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<TranscodeAcceptedResponse>), impl IntoResponse> {
    let video = match state.videos().get(&id) {
        Ok(Some(video)) => video,
        Ok(None) => {
            return Err(error(
                StatusCode::NOT_FOUND,
                format!("Video not found: {}", id),
            ))
        }
        Err(e) => return Err(error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };

    match video.transcode_status {
        TranscodeStatus::Processing => {
            let Some(claimant) = abandoned_claim(&state, &video) else {
                return Err(error(
                    StatusCode::CONFLICT,
                    format!("Video {} is already processing", id),
                ));
            };
            match state.videos().release_claim(&id, claimant) {
                Ok(true) => {
                    warn!(video_id = %id, claimant = %claimant, "Released abandoned transcode claim");
                }
                Ok(false) => {
                    return Err(error(
                        StatusCode::CONFLICT,
                        format!("Video {} changed state, try again", id),
                    ));
                }
                Err(e) => return Err(error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
            }
        }
        TranscodeStatus::Completed | TranscodeStatus::Failed => {
            if let Err(e) = state.videos().reset_for_retranscode(&id) {
                return Err(error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
            }
        }
        TranscodeStatus::Pending => {}
    }

    let task_type = &state.config().transcode.task_type;
    match enqueue_transcode(state.queue(), task_type, &id).await {
        Ok(task) => {
            info!(video_id = %id, task_id = %task.id, previous_status = %video.transcode_status, "Manual transcode queued");
            Ok((
                StatusCode::ACCEPTED,
                Json(TranscodeAcceptedResponse {
                    task_id: task.id,
                    video_id: id,
                    previous_status: video.transcode_status,
                }),
            ))
        }
        Err(e) => Err(error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())),
    }
}
