//! Transcode pipeline configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::ladder::{default_ladder, ResolutionRung};

/// Configuration for the transcode orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Parent directory for per-run scratch directories.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Maximum runs executing at once. Further runs wait for a slot.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Frames sampled from the source for moderation.
    #[serde(default = "default_sample_frames")]
    pub sample_frames: usize,

    /// Queue task type handled by the transcode handler.
    #[serde(default = "default_task_type")]
    pub task_type: String,

    #[serde(default = "default_renditions_prefix")]
    pub renditions_prefix: String,

    #[serde(default = "default_covers_prefix")]
    pub covers_prefix: String,

    /// Storage prefix for uploaded moderation sample frames.
    #[serde(default = "default_moderation_prefix")]
    pub moderation_prefix: String,

    /// Broker topic for video lifecycle events.
    #[serde(default = "default_events_topic")]
    pub events_topic: String,

    /// Broker topic for moderation requests.
    #[serde(default = "default_moderation_topic")]
    pub moderation_topic: String,

    /// Ordered resolution ladder; the first rung is the fallback.
    #[serde(default = "default_ladder")]
    pub ladder: Vec<ResolutionRung>,
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("mediaflow-scratch")
}

fn default_max_concurrent_runs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

fn default_sample_frames() -> usize {
    5
}

fn default_task_type() -> String {
    "video.transcode".to_string()
}

fn default_renditions_prefix() -> String {
    "renditions".to_string()
}

fn default_covers_prefix() -> String {
    "covers".to_string()
}

fn default_moderation_prefix() -> String {
    "moderation".to_string()
}

fn default_events_topic() -> String {
    "video-events".to_string()
}

fn default_moderation_topic() -> String {
    "content-moderation".to_string()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            max_concurrent_runs: default_max_concurrent_runs(),
            sample_frames: default_sample_frames(),
            task_type: default_task_type(),
            renditions_prefix: default_renditions_prefix(),
            covers_prefix: default_covers_prefix(),
            moderation_prefix: default_moderation_prefix(),
            events_topic: default_events_topic(),
            moderation_topic: default_moderation_topic(),
            ladder: default_ladder(),
        }
    }
}

impl TranscodeConfig {
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max;
        self
    }

    pub fn with_ladder(mut self, ladder: Vec<ResolutionRung>) -> Self {
        self.ladder = ladder;
        self
    }

    /// `<renditions_prefix>/<video_id><suffix>.mp4`
    pub fn rendition_key(&self, video_id: &str, rung: &ResolutionRung) -> String {
        format!("{}/{}{}.mp4", self.renditions_prefix, video_id, rung.suffix)
    }

    /// `<covers_prefix>/<video_id>.jpg`
    pub fn cover_key(&self, video_id: &str) -> String {
        format!("{}/{}.jpg", self.covers_prefix, video_id)
    }

    /// `<moderation_prefix>/<video_id>/frame_<n>.jpg`
    pub fn sample_key(&self, video_id: &str, n: usize) -> String {
        format!("{}/{}/frame_{}.jpg", self.moderation_prefix, video_id, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TranscodeConfig::default();
        assert!(config.max_concurrent_runs >= 1);
        assert_eq!(config.sample_frames, 5);
        assert_eq!(config.task_type, "video.transcode");
        assert_eq!(config.events_topic, "video-events");
        assert_eq!(config.moderation_topic, "content-moderation");
        assert_eq!(config.ladder.len(), 3);
        assert_eq!(config.ladder[0].name, "720p");
    }

    #[test]
    fn test_keys() {
        let config = TranscodeConfig::default();
        let rung = &config.ladder[1];
        assert_eq!(config.rendition_key("v1", rung), "renditions/v1_480p.mp4");
        assert_eq!(config.cover_key("v1"), "covers/v1.jpg");
        assert_eq!(config.sample_key("v1", 3), "moderation/v1/frame_3.jpg");
    }

    #[test]
    fn test_deserialize_custom_ladder() {
        let config: TranscodeConfig = toml::from_str(
            r#"
            max_concurrent_runs = 2

            [[ladder]]
            name = "1080p"
            width = 1920
            height = 1080
            suffix = "_1080p"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_concurrent_runs, 2);
        assert_eq!(config.ladder.len(), 1);
        assert_eq!(config.ladder[0].suffix, "_1080p");
        assert_eq!(config.sample_frames, 5);
    }
}
