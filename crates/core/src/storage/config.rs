//! Configuration for the storage module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the filesystem object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory objects are stored under.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Base URL prepended to keys by `get_url`.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Buffer size for file copies (bytes).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_root() -> PathBuf {
    PathBuf::from("objects")
}

fn default_public_base_url() -> String {
    "http://localhost:8080/objects".to_string()
}

fn default_buffer_size() -> usize {
    1024 * 1024 // 1 MiB
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            public_base_url: default_public_base_url(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl StorageConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}
