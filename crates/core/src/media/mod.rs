//! Media tool adapter.
//!
//! Wraps the external prober/encoder behind the [`MediaTool`] trait. The
//! ffmpeg implementation uses fixed argument contracts for each operation.

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use config::MediaConfig;
pub use error::MediaToolError;
pub use ffmpeg::FfmpegTool;
pub use traits::MediaTool;
pub use types::{format_timestamp, sample_timestamps, ProbeInfo};
