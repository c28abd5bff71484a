pub mod config;
pub mod events;
pub mod media;
pub mod metrics;
pub mod queue;
pub mod storage;
pub mod testing;
pub mod transcode;
pub mod video;

pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use events::{BrokerEventPublisher, EventPublisher, ModerationRequest, VideoEvent};
pub use media::{FfmpegTool, MediaTool, MediaToolError};
pub use queue::{
    Broker, QueueError, SqliteBroker, SqliteTaskStore, TaskHandler, TaskMessage, TaskQueue,
    TaskStatus, TaskStore,
};
pub use storage::{FsStorage, StorageError, StorageGateway};
pub use transcode::{
    TranscodeConfig, TranscodeError, TranscodeOrchestrator, TranscodeReport,
    TranscodeTaskHandler,
};
pub use video::{SqliteVideoStore, TranscodeStatus, Video, VideoStore};
