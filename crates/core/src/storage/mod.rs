//! Storage gateway.
//!
//! Object-store abstraction for source uploads, covers and renditions.

mod config;
mod error;
mod fs_storage;
mod traits;

pub use config::StorageConfig;
pub use error::StorageError;
pub use fs_storage::FsStorage;
pub use traits::{ByteStream, StorageGateway};
