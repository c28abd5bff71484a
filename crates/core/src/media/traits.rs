//! Trait definitions for the media tool module.

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::error::MediaToolError;
use super::types::ProbeInfo;

/// External prober/encoder used by the transcode pipeline.
///
/// Every call is bounded by the implementation's deadline and aborts with
/// `MediaToolError::Cancelled` as soon as `cancel` fires.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Returns the name of this tool implementation.
    fn name(&self) -> &str;

    /// Reads width, height and duration of `input`.
    async fn probe(&self, input: &Path, cancel: &CancellationToken)
        -> Result<ProbeInfo, MediaToolError>;

    /// Writes a still JPEG taken one second into `input`.
    async fn extract_cover(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError>;

    /// Writes a still JPEG taken at `at_secs`.
    async fn extract_frame(
        &self,
        input: &Path,
        at_secs: f64,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError>;

    /// Re-encodes `input` into a web-optimized H.264/AAC master.
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError>;

    /// Encodes one rendition letterboxed to exactly `width`x`height`.
    async fn encode_rendition(
        &self,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError>;

    /// Validates that the tool is properly configured and ready.
    async fn validate(&self) -> Result<(), MediaToolError>;
}
