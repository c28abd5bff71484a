use std::sync::Arc;

use mediaflow_core::{Config, TaskQueue, TranscodeOrchestrator, VideoStore};

/// Shared application state
pub struct AppState {
    config: Config,
    queue: TaskQueue,
    videos: Arc<dyn VideoStore>,
    orchestrator: Arc<TranscodeOrchestrator>,
}

impl AppState {
    pub fn new(
        config: Config,
        queue: TaskQueue,
        videos: Arc<dyn VideoStore>,
        orchestrator: Arc<TranscodeOrchestrator>,
    ) -> Self {
        Self {
            config,
            queue,
            videos,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn videos(&self) -> &dyn VideoStore {
        self.videos.as_ref()
    }

    pub fn orchestrator(&self) -> &TranscodeOrchestrator {
        self.orchestrator.as_ref()
    }
}
