//! Filesystem-backed object store.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use super::config::StorageConfig;
use super::error::StorageError;
use super::traits::{ByteStream, StorageGateway};

/// Stores objects as files under a root directory, keyed by relative path.
pub struct FsStorage {
    config: StorageConfig,
}

impl FsStorage {
    /// Creates a new filesystem store with the given configuration.
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Resolves a key to a path under the root, rejecting escapes.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.config.root.join(relative))
    }

    /// Temporary sibling path used for write-then-rename.
    fn staging_path(destination: &Path) -> PathBuf {
        let mut name = destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.partial", uuid::Uuid::new_v4()));
        destination.with_file_name(name)
    }

    async fn ensure_parent(key: &str, destination: &Path) -> Result<(), StorageError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(key, e))?;
        }
        Ok(())
    }

    async fn commit(key: &str, staging: &Path, destination: &Path) -> Result<(), StorageError> {
        if let Err(e) = fs::rename(staging, destination).await {
            let _ = fs::remove_file(staging).await;
            return Err(StorageError::io(key, e));
        }
        Ok(())
    }

    /// Copies `source` to `staging` through buffers of the configured size.
    async fn copy_file(
        &self,
        key: &str,
        source: &Path,
        staging: &Path,
    ) -> Result<u64, StorageError> {
        let source_file = File::open(source)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        let dest_file = File::create(staging)
            .await
            .map_err(|e| StorageError::io(key, e))?;

        let mut reader = BufReader::with_capacity(self.config.buffer_size, source_file);
        let mut writer = BufWriter::with_capacity(self.config.buffer_size, dest_file);
        let total_bytes = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| StorageError::io(key, e))?;

        writer.flush().await.map_err(|e| StorageError::io(key, e))?;
        Ok(total_bytes)
    }
}

#[async_trait]
impl StorageGateway for FsStorage {
    fn name(&self) -> &str {
        "fs"
    }

    async fn upload(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let destination = self.resolve(key)?;
        Self::ensure_parent(key, &destination).await?;

        let staging = Self::staging_path(&destination);
        if let Err(e) = fs::write(&staging, &data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::io(key, e));
        }
        Self::commit(key, &staging, &destination).await?;

        debug!(key, content_type, bytes = data.len(), "Stored object");
        Ok(())
    }

    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let destination = self.resolve(key)?;
        Self::ensure_parent(key, &destination).await?;

        let staging = Self::staging_path(&destination);
        let bytes = match self.copy_file(key, path, &staging).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(e);
            }
        };
        Self::commit(key, &staging, &destination).await?;

        debug!(key, content_type, bytes, "Stored object from file");
        Ok(bytes)
    }

    async fn get(&self, key: &str) -> Result<ByteStream, StorageError> {
        let path = self.resolve(key)?;
        let file = File::open(&path)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        Ok(Box::new(BufReader::with_capacity(self.config.buffer_size, file)))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    fn get_url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.config.public_base_url.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn storage(dir: &TempDir) -> FsStorage {
        FsStorage::new(StorageConfig {
            root: dir.path().join("objects"),
            public_base_url: "https://cdn.example.com/media/".to_string(),
            buffer_size: 8,
        })
    }

    async fn read_all(mut stream: ByteStream) -> Vec<u8> {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_upload_and_get() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);

        store
            .upload(b"hello world".to_vec(), "videos/v1/source.mp4", "video/mp4")
            .await
            .unwrap();

        let data = read_all(store.get("videos/v1/source.mp4").await.unwrap()).await;
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_upload_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);

        store.upload(b"one".to_vec(), "k", "text/plain").await.unwrap();
        store.upload(b"two".to_vec(), "k", "text/plain").await.unwrap();

        assert_eq!(read_all(store.get("k").await.unwrap()).await, b"two");
    }

    #[tokio::test]
    async fn test_upload_file_streams_contents() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);
        let source = dir.path().join("rendition.mp4");
        let payload: Vec<u8> = (0..100u8).collect();
        tokio::fs::write(&source, &payload).await.unwrap();

        let bytes = store
            .upload_file(&source, "renditions/v1_720p.mp4", "video/mp4")
            .await
            .unwrap();

        assert_eq!(bytes, 100);
        assert_eq!(
            read_all(store.get("renditions/v1_720p.mp4").await.unwrap()).await,
            payload
        );
        // No staging files left behind.
        let mut entries = tokio::fs::read_dir(dir.path().join("objects/renditions")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_file_missing_source() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);
        let err = store
            .upload_file(&dir.path().join("missing.mp4"), "k", "video/mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);
        let err = store.get("nope").await.err().unwrap();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);
        store.upload(b"x".to_vec(), "k", "text/plain").await.unwrap();

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);
        for key in ["", "../etc/passwd", "/abs/path", "a/../../b"] {
            let err = store.upload(b"x".to_vec(), key, "text/plain").await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey { .. }), "key {:?}", key);
        }
    }

    #[test]
    fn test_get_url() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);
        assert_eq!(
            store.get_url("covers/v1.jpg"),
            "https://cdn.example.com/media/covers/v1.jpg"
        );
    }
}
