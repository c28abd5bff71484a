//! Outbound events: video lifecycle notifications and moderation requests.

mod publisher;
mod types;

pub use publisher::{BrokerEventPublisher, EventPublisher, PublishError};
pub use types::{ModerationRequest, ModerationSubject, VideoEvent};
