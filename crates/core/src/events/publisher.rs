//! Event publisher trait and broker-backed implementation.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::queue::{BrokerError, Broker};

use super::types::{ModerationRequest, VideoEvent};

/// Errors raised while publishing an event.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Outbound side channel for lifecycle events and moderation requests.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a video lifecycle event.
    async fn publish_video_event(&self, event: &VideoEvent) -> Result<(), PublishError>;

    /// Publish a content-safety check request.
    async fn request_moderation(&self, request: &ModerationRequest) -> Result<(), PublishError>;
}

/// Publishes events as JSON records on broker topics, keyed by video id.
pub struct BrokerEventPublisher {
    broker: Arc<dyn Broker>,
    events_topic: String,
    moderation_topic: String,
}

impl BrokerEventPublisher {
    pub fn new(
        broker: Arc<dyn Broker>,
        events_topic: impl Into<String>,
        moderation_topic: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            events_topic: events_topic.into(),
            moderation_topic: moderation_topic.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for BrokerEventPublisher {
    async fn publish_video_event(&self, event: &VideoEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.broker
            .publish(&self.events_topic, &event.id, &payload)
            .await?;
        debug!(video_id = %event.id, status = %event.status, topic = %self.events_topic, "Published video event");
        Ok(())
    }

    async fn request_moderation(&self, request: &ModerationRequest) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(request)?;
        self.broker
            .publish(&self.moderation_topic, &request.video_id, &payload)
            .await?;
        debug!(video_id = %request.video_id, subject = ?request.subject, "Published moderation request");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ModerationSubject;
    use crate::queue::{partition_for, SqliteBroker};

    #[tokio::test]
    async fn test_publishes_to_topics() {
        let broker = Arc::new(SqliteBroker::in_memory(1).unwrap());
        let publisher =
            BrokerEventPublisher::new(broker.clone(), "video-events", "content-moderation");

        publisher
            .publish_video_event(&VideoEvent::completed("v1", "t1", 12.0, 640, 360))
            .await
            .unwrap();
        publisher
            .request_moderation(&ModerationRequest::new(
                "v1",
                "t1",
                ModerationSubject::SourceFrames,
                vec![],
            ))
            .await
            .unwrap();

        let events = broker.fetch("video-events", "test", 0, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "v1");
        let decoded: VideoEvent = serde_json::from_slice(&events[0].payload).unwrap();
        assert_eq!(decoded.width, Some(640));

        let moderation = broker.fetch("content-moderation", "test", 0, 10).await.unwrap();
        assert_eq!(moderation.len(), 1);
        assert_eq!(partition_for("v1", 1), moderation[0].partition);
    }
}
