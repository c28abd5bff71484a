//! Video storage trait.

use thiserror::Error;

use super::types::{NewVideo, Rendition, TranscodeCompletion, Video};

/// Errors raised by a video store.
#[derive(Debug, Error)]
pub enum VideoStoreError {
    /// Video not found.
    #[error("Video not found: {0}")]
    NotFound(String),

    /// Transition not allowed from the current status.
    #[error("Cannot {operation} video {video_id}: current status is {current_status}")]
    InvalidState {
        video_id: String,
        current_status: String,
        operation: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Persistence for video records and their renditions.
pub trait VideoStore: Send + Sync {
    /// Register an uploaded video in `pending` status.
    fn create(&self, video: NewVideo) -> Result<Video, VideoStoreError>;

    /// Get a video by id.
    fn get(&self, id: &str) -> Result<Option<Video>, VideoStoreError>;

    /// Atomically move a video from `pending` or `failed` to `processing`,
    /// recording `claimant` as the claim holder.
    ///
    /// A `processing` video already claimed by the same `claimant` is
    /// claimed again, which lets a redelivered task pick up after a crash.
    /// Returns `false` without changing anything otherwise. Errors with
    /// `NotFound` if the video does not exist.
    fn try_begin_processing(&self, id: &str, claimant: &str) -> Result<bool, VideoStoreError>;

    /// Hand a `processing` video held by `claimant` back to `pending`.
    /// Returns `false` if the video is not held by `claimant`.
    fn release_claim(&self, id: &str, claimant: &str) -> Result<bool, VideoStoreError>;

    /// Move a `completed` or `failed` video back to `pending` so a manual
    /// re-trigger can start a fresh cycle. Returns `false` if the video is
    /// already `pending` or `processing`.
    fn reset_for_retranscode(&self, id: &str) -> Result<bool, VideoStoreError>;

    /// Record the cover image key.
    fn set_cover_key(&self, id: &str, cover_key: &str) -> Result<(), VideoStoreError>;

    /// Write final metadata and renditions, moving `processing` to `completed`.
    fn complete_transcode(
        &self,
        id: &str,
        completion: &TranscodeCompletion,
    ) -> Result<(), VideoStoreError>;

    /// Move `processing` to `failed`, keeping the error text.
    fn fail_transcode(&self, id: &str, error: &str) -> Result<(), VideoStoreError>;

    /// Renditions recorded by the last completed run, main first.
    fn renditions(&self, id: &str) -> Result<Vec<Rendition>, VideoStoreError>;
}
