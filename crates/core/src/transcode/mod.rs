//! Video transcode pipeline.
//!
//! The [`TranscodeOrchestrator`] turns an uploaded source into a cover
//! image and a ladder of renditions. Runs are claimed through an atomic
//! status transition on the video record, bounded by a worker pool, and
//! cancellable. [`TranscodeTaskHandler`] connects it to the task queue.

mod config;
mod error;
mod handler;
mod ladder;
mod orchestrator;
mod scratch;
mod types;

pub use config::TranscodeConfig;
pub use error::{StepCause, StepError, TranscodeError, TranscodeStep};
pub use handler::{enqueue_transcode, TranscodePayload, TranscodeTaskHandler};
pub use ladder::{default_ladder, fit_dimensions, select_rungs, ResolutionRung};
pub use orchestrator::TranscodeOrchestrator;
pub use scratch::{ScratchDir, ScratchFile};
pub use types::{OrchestratorStatus, RunHandle, SoftFailure, TranscodeReport};
