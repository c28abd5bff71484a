//! Video records and their transcode lifecycle.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteVideoStore;
pub use store::{VideoStore, VideoStoreError};
pub use types::{NewVideo, Rendition, TranscodeCompletion, TranscodeStatus, Video};
