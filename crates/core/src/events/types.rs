//! Event payloads published by the transcode pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::video::TranscodeStatus;

/// Video lifecycle event on the video events topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoEvent {
    pub id: String,
    pub tenant_id: String,
    pub status: TranscodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub processed_at: DateTime<Utc>,
}

impl VideoEvent {
    /// "Processing started".
    pub fn processing(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            status: TranscodeStatus::Processing,
            duration: None,
            width: None,
            height: None,
            processed_at: Utc::now(),
        }
    }

    /// "Processing completed" with the main rendition's geometry.
    pub fn completed(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        duration: f64,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            status: TranscodeStatus::Completed,
            duration: Some(duration),
            width: Some(width),
            height: Some(height),
            processed_at: Utc::now(),
        }
    }

    /// "Processing failed".
    pub fn failed(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            status: TranscodeStatus::Failed,
            ..Self::processing(id, tenant_id)
        }
    }
}

/// What a moderation request covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModerationSubject {
    /// Frames sampled from the source video.
    SourceFrames,
    /// The extracted cover image.
    Cover,
}

/// Content-safety check request on the moderation topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRequest {
    pub request_id: String,
    pub video_id: String,
    pub tenant_id: String,
    pub subject: ModerationSubject,
    /// URLs of the images to check.
    pub image_urls: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

impl ModerationRequest {
    pub fn new(
        video_id: impl Into<String>,
        tenant_id: impl Into<String>,
        subject: ModerationSubject,
        image_urls: Vec<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            video_id: video_id.into(),
            tenant_id: tenant_id.into(),
            subject,
            image_urls,
            requested_at: Utc::now(),
        }
    }
}
