use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{dead_letters, handlers, middleware::metrics_middleware, videos};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and observability
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/queue/status", get(handlers::queue_status))
        // Operator actions
        .route("/videos/{id}/transcode", post(videos::trigger_transcode))
        .route("/dead-letters/{id}/replay", post(dead_letters::replay))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
