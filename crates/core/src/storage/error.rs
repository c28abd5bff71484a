//! Error types for the storage module.

use thiserror::Error;

/// Errors raised by a storage gateway.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object stored under this key.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Key is empty, absolute, or escapes the store root.
    #[error("Invalid object key: {key}")]
    InvalidKey { key: String },

    /// Read or write failed.
    #[error("Storage I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { key: key.into() }
        } else {
            Self::Io {
                key: key.into(),
                source,
            }
        }
    }
}
