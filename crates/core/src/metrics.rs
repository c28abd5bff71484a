//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Task queue (enqueues, attempts, dead letters)
//! - Transcode pipeline (runs, step failures, renditions)
//! - Media tool invocations

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Task Queue Metrics
// =============================================================================

/// Tasks enqueued by type.
pub static TASKS_ENQUEUED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediaflow_tasks_enqueued_total", "Total tasks enqueued"),
        &["task_type"],
    )
    .unwrap()
});

/// Dispatch attempts by outcome.
pub static TASK_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediaflow_task_attempts_total", "Total task dispatch attempts"),
        &["task_type", "outcome"], // see DispatchOutcome labels
    )
    .unwrap()
});

/// Messages routed to the dead-letter stream.
pub static DEAD_LETTERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediaflow_dead_lettered_total",
            "Total messages routed to the dead-letter stream",
        ),
        &["reason"], // "exhausted", "no_handler", "undecodable"
    )
    .unwrap()
});

/// Handler duration in seconds.
pub static TASK_HANDLER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediaflow_task_handler_duration_seconds",
            "Duration of task handler invocations",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["task_type"],
    )
    .unwrap()
});

// =============================================================================
// Transcode Pipeline Metrics
// =============================================================================

/// Pipeline runs by final status.
pub static TRANSCODE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediaflow_transcode_runs_total", "Total transcode runs"),
        &["status"], // "completed", "failed", "interrupted"
    )
    .unwrap()
});

/// Pipeline run duration in seconds.
pub static TRANSCODE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediaflow_transcode_duration_seconds",
            "Duration of a full transcode run",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["status"],
    )
    .unwrap()
});

/// Step failures by step and severity.
pub static TRANSCODE_STEP_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediaflow_transcode_step_failures_total",
            "Total transcode step failures",
        ),
        &["step", "severity"], // severity: "soft", "hard"
    )
    .unwrap()
});

/// Renditions uploaded by ladder rung.
pub static RENDITIONS_PRODUCED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediaflow_renditions_produced_total",
            "Total renditions encoded and uploaded",
        ),
        &["rendition"],
    )
    .unwrap()
});

/// Runs currently holding a pipeline slot.
pub static TRANSCODE_ACTIVE_RUNS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediaflow_transcode_active_runs",
        "Number of transcode runs currently executing",
    )
    .unwrap()
});

// =============================================================================
// Media Tool Metrics
// =============================================================================

/// Media tool invocation duration.
pub static MEDIA_TOOL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediaflow_media_tool_duration_seconds",
            "Duration of media tool invocations",
        )
        .buckets(vec![0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Queue
        Box::new(TASKS_ENQUEUED.clone()),
        Box::new(TASK_ATTEMPTS.clone()),
        Box::new(DEAD_LETTERED.clone()),
        Box::new(TASK_HANDLER_DURATION.clone()),
        // Pipeline
        Box::new(TRANSCODE_RUNS.clone()),
        Box::new(TRANSCODE_DURATION.clone()),
        Box::new(TRANSCODE_STEP_FAILURES.clone()),
        Box::new(RENDITIONS_PRODUCED.clone()),
        Box::new(TRANSCODE_ACTIVE_RUNS.clone()),
        // Media tool
        Box::new(MEDIA_TOOL_DURATION.clone()),
    ]
}
