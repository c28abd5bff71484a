use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use mediaflow_core::queue::QueueStatus;
use mediaflow_core::transcode::OrchestratorStatus;

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

/// Queue and transcode pool status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub queue: QueueStatus,
    pub transcode: OrchestratorStatus,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub async fn queue_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, impl IntoResponse> {
    match state.queue().status().await {
        Ok(queue) => Ok(Json(StatusResponse {
            queue,
            transcode: state.orchestrator().status(),
        })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}
