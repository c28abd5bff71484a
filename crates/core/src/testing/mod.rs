//! Testing utilities and mock implementations.
//!
//! Mocks for every external collaborator of the transcode pipeline, so
//! runs can be exercised end to end without ffmpeg, an object store, or a
//! broker.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediaflow_core::testing::{MockEventPublisher, MockMediaTool, MockStorage};
//!
//! let tool = MockMediaTool::new();
//! let storage = MockStorage::new();
//! let events = MockEventPublisher::new();
//!
//! // Configure mock behavior
//! storage.put_object("uploads/v1.mp4", b"source".to_vec()).await;
//! tool.fail_operation("cover").await;
//! ```

mod mock_event_publisher;
mod mock_media_tool;
mod mock_storage;

pub use mock_event_publisher::MockEventPublisher;
pub use mock_media_tool::{MockMediaTool, ToolCall};
pub use mock_storage::{MockStorage, StoredObject};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::media::ProbeInfo;
    use crate::transcode::TranscodeConfig;
    use crate::video::NewVideo;

    /// Create a new video record with its source under `uploads/`.
    pub fn new_video(id: &str) -> NewVideo {
        NewVideo::new(id, "tenant-1", source_key(id)).with_title(format!("Video {}", id))
    }

    /// Storage key of the source uploaded for `id`.
    pub fn source_key(id: &str) -> String {
        format!("uploads/{}.mp4", id)
    }

    pub fn probe_info(width: u32, height: u32, duration_secs: f64) -> ProbeInfo {
        ProbeInfo {
            width,
            height,
            duration_secs,
        }
    }

    /// Default transcode config with scratch space under `scratch_dir` and
    /// a pool of two runs.
    pub fn transcode_config(scratch_dir: &Path) -> TranscodeConfig {
        TranscodeConfig::default()
            .with_scratch_dir(scratch_dir)
            .with_max_concurrent_runs(2)
    }
}
