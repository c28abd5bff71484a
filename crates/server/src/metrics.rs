//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the mediaflow server:
//! - HTTP request metrics (latency, counts)
//! - Task counts by status and transcode pool occupancy (collected dynamically)
//! - Queue and pipeline metrics registered by the core crate

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::error;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediaflow_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediaflow_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediaflow_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Queue and Pool Gauges
// =============================================================================

/// Task rows by status (collected dynamically).
pub static TASKS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("mediaflow_tasks_by_status", "Current task count by status"),
        &["status"],
    )
    .unwrap()
});

/// Whether queue consumers are running (1) or not (0).
pub static QUEUE_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediaflow_queue_running",
        "Whether the task queue consumers are running",
    )
    .unwrap()
});

/// Transcode runs waiting for a pool slot.
pub static TRANSCODE_POOL_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediaflow_transcode_pool_queued",
        "Transcode runs waiting for a worker slot",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Queue and pool
    registry
        .register(Box::new(TASKS_BY_STATUS.clone()))
        .unwrap();
    registry.register(Box::new(QUEUE_RUNNING.clone())).unwrap();
    registry
        .register(Box::new(TRANSCODE_POOL_QUEUED.clone()))
        .unwrap();

    // Core metrics (queue, pipeline, media tool)
    for metric in mediaflow_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the current task counts and
/// pool occupancy.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    match state.queue().status().await {
        Ok(status) => {
            QUEUE_RUNNING.set(if status.running { 1 } else { 0 });
            let tasks = status.tasks;
            for (label, count) in [
                ("pending", tasks.pending),
                ("processing", tasks.processing),
                ("retrying", tasks.retrying),
                ("completed", tasks.completed),
                ("failed", tasks.failed),
            ] {
                TASKS_BY_STATUS.with_label_values(&[label]).set(count);
            }
        }
        Err(e) => error!("Failed to collect queue status: {}", e),
    }

    let pool = state.orchestrator().status();
    TRANSCODE_POOL_QUEUED.set(pool.queued_runs as i64);
}

/// Normalize a path for metric labels (replace IDs with placeholders).
///
/// The segment after `videos` or `dead-letters` is an id.
pub fn normalize_path(path: &str) -> String {
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let normalized = if matches!(previous, "videos" | "dead-letters") && !segment.is_empty() {
                "{id}"
            } else {
                segment
            };
            previous = segment;
            normalized
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_video_id() {
        let path = "/api/v1/videos/550e8400-e29b-41d4-a716-446655440000/transcode";
        assert_eq!(normalize_path(path), "/api/v1/videos/{id}/transcode");
    }

    #[test]
    fn test_normalize_path_dead_letter_id() {
        let path = "/api/v1/dead-letters/task-42/replay";
        assert_eq!(normalize_path(path), "/api/v1/dead-letters/{id}/replay");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
        assert_eq!(normalize_path("/api/v1/videos/"), "/api/v1/videos/");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("mediaflow_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_core_metrics() {
        TASKS_BY_STATUS.with_label_values(&["pending"]).set(0);
        QUEUE_RUNNING.set(0);
        mediaflow_core::metrics::TASKS_ENQUEUED
            .with_label_values(&["video.transcode"])
            .inc();
        mediaflow_core::metrics::TRANSCODE_RUNS
            .with_label_values(&["completed"])
            .inc();

        let output = encode_metrics();

        assert!(output.contains("mediaflow_tasks_by_status"));
        assert!(output.contains("mediaflow_queue_running"));
        assert!(output.contains("mediaflow_tasks_enqueued_total"));
        assert!(output.contains("mediaflow_transcode_runs_total"));
    }
}
