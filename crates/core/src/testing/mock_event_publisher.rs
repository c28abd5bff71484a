//! Mock event publisher for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::events::{EventPublisher, ModerationRequest, PublishError, VideoEvent};
use crate::queue::BrokerError;
use crate::video::TranscodeStatus;

/// Records published events instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct MockEventPublisher {
    video_events: Arc<RwLock<Vec<VideoEvent>>>,
    moderation_requests: Arc<RwLock<Vec<ModerationRequest>>>,
    offline: Arc<RwLock<bool>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// When offline, every publish fails with a broker error.
    pub async fn set_offline(&self, offline: bool) {
        *self.offline.write().await = offline;
    }

    pub async fn video_events(&self) -> Vec<VideoEvent> {
        self.video_events.read().await.clone()
    }

    /// Statuses of published video events, in order.
    pub async fn statuses(&self) -> Vec<TranscodeStatus> {
        self.video_events
            .read()
            .await
            .iter()
            .map(|e| e.status)
            .collect()
    }

    pub async fn moderation_requests(&self) -> Vec<ModerationRequest> {
        self.moderation_requests.read().await.clone()
    }

    async fn check_online(&self) -> Result<(), PublishError> {
        if *self.offline.read().await {
            return Err(PublishError::Broker(BrokerError::Unavailable(
                "mock publisher offline".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_video_event(&self, event: &VideoEvent) -> Result<(), PublishError> {
        self.check_online().await?;
        self.video_events.write().await.push(event.clone());
        Ok(())
    }

    async fn request_moderation(&self, request: &ModerationRequest) -> Result<(), PublishError> {
        self.check_online().await?;
        self.moderation_requests.write().await.push(request.clone());
        Ok(())
    }
}
