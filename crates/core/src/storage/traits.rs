//! Trait definitions for the storage module.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncRead;

use super::error::StorageError;

/// Readable body of a stored object.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Object store used for sources, covers and renditions.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Returns the name of this gateway implementation.
    fn name(&self) -> &str;

    /// Stores `data` under `key`, replacing any existing object.
    async fn upload(&self, data: Vec<u8>, key: &str, content_type: &str)
        -> Result<(), StorageError>;

    /// Stores the contents of a local file under `key`. Returns bytes written.
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        let len = data.len() as u64;
        self.upload(data, key, content_type).await?;
        Ok(len)
    }

    /// Opens the object stored under `key` for reading.
    async fn get(&self, key: &str) -> Result<ByteStream, StorageError>;

    /// Removes the object stored under `key`. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Public URL for `key`.
    fn get_url(&self, key: &str) -> String;
}
