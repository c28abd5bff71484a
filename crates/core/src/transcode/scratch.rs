//! Scoped scratch files for a single pipeline run.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::warn;

/// Per-run scratch directory, removed with everything in it on drop.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory under `parent` for `video_id`.
    pub fn create(parent: &Path, video_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("transcode-{}-", video_id))
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reserve a file path inside the directory. The file is removed when
    /// the returned guard drops.
    pub fn file(&self, name: &str) -> ScratchFile {
        ScratchFile {
            path: self.dir.path().join(name),
        }
    }
}

/// A scratch file path removed from disk when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove scratch file"),
        }
    }
}
