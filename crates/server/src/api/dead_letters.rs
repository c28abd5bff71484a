//! Dead-letter API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use mediaflow_core::QueueError;

use super::handlers::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub task_id: String,
    pub task_type: String,
    pub replay_of: String,
}

/// Re-enqueue a dead-lettered task under a new id.
pub async fn replay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ReplayResponse>), impl IntoResponse> {
    match state.queue().replay_dead_letter(&id).await {
        Ok(task) => Ok((
            StatusCode::ACCEPTED,
            Json(ReplayResponse {
                task_id: task.id,
                task_type: task.task_type,
                replay_of: id,
            }),
        )),
        Err(e) => {
            let status = match e {
                QueueError::NotFound(_) => StatusCode::NOT_FOUND,
                QueueError::NotDeadLettered { .. } | QueueError::AlreadyExists { .. } => {
                    StatusCode::CONFLICT
                }
                QueueError::Broker(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}
