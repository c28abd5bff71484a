//! Mock storage gateway for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::storage::{ByteStream, StorageError, StorageGateway};

/// An object held by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// In-memory implementation of the StorageGateway trait.
///
/// Objects live in a map keyed by storage key. Uploads can be made to fail
/// for keys containing a given fragment.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    failing_upload_fragments: Arc<RwLock<Vec<String>>>,
    fail_gets: Arc<RwLock<bool>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, e.g. an uploaded source video.
    pub async fn put_object(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stored keys starting with `prefix`, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .await
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    /// Fail uploads whose key contains `fragment`.
    pub async fn fail_uploads_containing(&self, fragment: &str) {
        self.failing_upload_fragments
            .write()
            .await
            .push(fragment.to_string());
    }

    /// Fail every `get`.
    pub async fn set_fail_gets(&self, fail: bool) {
        *self.fail_gets.write().await = fail;
    }
}

fn unavailable(key: &str) -> StorageError {
    StorageError::io(key, std::io::Error::other("mock storage unavailable"))
}

#[async_trait]
impl StorageGateway for MockStorage {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upload(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let failing = self.failing_upload_fragments.read().await;
        if failing.iter().any(|f| key.contains(f.as_str())) {
            return Err(unavailable(key));
        }
        drop(failing);

        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream, StorageError> {
        if *self.fail_gets.read().await {
            return Err(unavailable(key));
        }
        match self.objects.read().await.get(key) {
            Some(object) => Ok(Box::new(Cursor::new(object.data.clone()))),
            None => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    fn get_url(&self, key: &str) -> String {
        format!("mock://storage/{}", key)
    }
}
