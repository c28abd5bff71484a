//! Error types for the media tool module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by media tool invocations.
#[derive(Debug, Error)]
pub enum MediaToolError {
    /// FFmpeg binary not found.
    #[error("FFmpeg not found at path: {path}")]
    FfmpegNotFound { path: PathBuf },

    /// FFprobe binary not found.
    #[error("FFprobe not found at path: {path}")]
    FfprobeNotFound { path: PathBuf },

    /// The tool exited non-zero or produced no output file.
    #[error("{operation} failed: {reason}")]
    ToolFailed {
        operation: &'static str,
        reason: String,
        stderr: Option<String>,
    },

    /// Probe output did not have the expected shape.
    #[error("Failed to parse probe output: {reason}")]
    ParseError { reason: String },

    /// The invocation exceeded its deadline and was killed.
    #[error("{operation} timed out after {timeout_secs} seconds")]
    Timeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    /// The invocation was cancelled and the process killed.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// I/O error while spawning or reading the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaToolError {
    /// Creates a tool failure with optional stderr output.
    pub fn tool_failed(
        operation: &'static str,
        reason: impl Into<String>,
        stderr: Option<String>,
    ) -> Self {
        Self::ToolFailed {
            operation,
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates a parse error.
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::ParseError {
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
