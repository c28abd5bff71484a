//! Video record types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transcode lifecycle of a video.
///
/// `Pending -> Processing -> {Completed, Failed}`. A manual re-trigger may
/// move `Failed` back to `Processing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TranscodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeStatus::Pending => "pending",
            TranscodeStatus::Processing => "processing",
            TranscodeStatus::Completed => "completed",
            TranscodeStatus::Failed => "failed",
        }
    }

    /// Whether a new run may start from this status.
    pub fn can_begin(&self) -> bool {
        matches!(self, TranscodeStatus::Pending | TranscodeStatus::Failed)
    }
}

impl fmt::Display for TranscodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranscodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TranscodeStatus::Pending),
            "processing" => Ok(TranscodeStatus::Processing),
            "completed" => Ok(TranscodeStatus::Completed),
            "failed" => Ok(TranscodeStatus::Failed),
            other => Err(format!("unknown transcode status: {}", other)),
        }
    }
}

/// Tenant-scoped media asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub description: String,
    /// Storage key of the uploaded source file.
    pub source_key: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub transcode_status: TranscodeStatus,
    pub is_transcoded: bool,
    pub cover_key: Option<String>,
    /// Error text from the last failed run.
    pub transcode_error: Option<String>,
    /// Who holds the `processing` claim, usually a queue task id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register an uploaded video.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub description: String,
    pub source_key: String,
    pub size_bytes: u64,
}

impl NewVideo {
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        source_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            title: String::new(),
            description: String::new(),
            source_key: source_key.into(),
            size_bytes: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// One uploaded rendition of a video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rendition {
    /// Ladder rung name, e.g. `720p`.
    pub name: String,
    pub storage_key: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// Metadata written when a run completes.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeCompletion {
    pub duration_secs: f64,
    /// The main rendition's geometry and size.
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    /// Non-empty; the first entry is the main rendition.
    pub renditions: Vec<Rendition>,
}
