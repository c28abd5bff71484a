//! SQLite-backed video store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::store::{VideoStore, VideoStoreError};
use super::types::{NewVideo, Rendition, TranscodeCompletion, TranscodeStatus, Video};

const SELECT_COLUMNS: &str = "id, tenant_id, title, description, source_key, size_bytes, duration_secs, width, height, transcode_status, is_transcoded, cover_key, transcode_error, created_at, updated_at, claimed_by";

/// SQLite-backed video store.
pub struct SqliteVideoStore {
    conn: Mutex<Connection>,
}

impl SqliteVideoStore {
    /// Create a new SQLite video store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, VideoStoreError> {
        let conn = Connection::open(path).map_err(|e| VideoStoreError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite video store (useful for testing).
    pub fn in_memory() -> Result<Self, VideoStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| VideoStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), VideoStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                source_key TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                duration_secs REAL NOT NULL DEFAULT 0,
                width INTEGER NOT NULL DEFAULT 0,
                height INTEGER NOT NULL DEFAULT 0,
                transcode_status TEXT NOT NULL,
                is_transcoded INTEGER NOT NULL DEFAULT 0,
                cover_key TEXT,
                transcode_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                claimed_by TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_videos_tenant ON videos(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(transcode_status);

            CREATE TABLE IF NOT EXISTS video_renditions (
                video_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                PRIMARY KEY (video_id, name)
            );
            "#,
        )
        .map_err(|e| VideoStoreError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, VideoStoreError> {
        self.conn
            .lock()
            .map_err(|_| VideoStoreError::Database("video store lock poisoned".to_string()))
    }

    fn parse_time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_video(row: &rusqlite::Row) -> rusqlite::Result<Video> {
        let status_str: String = row.get(9)?;
        let created_at: String = row.get(13)?;
        let updated_at: String = row.get(14)?;

        Ok(Video {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            source_key: row.get(4)?,
            size_bytes: row.get::<_, i64>(5)? as u64,
            duration_secs: row.get(6)?,
            width: row.get(7)?,
            height: row.get(8)?,
            transcode_status: status_str.parse().unwrap_or(TranscodeStatus::Pending),
            is_transcoded: row.get(10)?,
            cover_key: row.get(11)?,
            transcode_error: row.get(12)?,
            claimed_by: row.get(15)?,
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Video>, VideoStoreError> {
        let sql = format!("SELECT {} FROM videos WHERE id = ?", SELECT_COLUMNS);
        match conn.query_row(&sql, params![id], Self::row_to_video) {
            Ok(video) => Ok(Some(video)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(VideoStoreError::Database(e.to_string())),
        }
    }

    /// Explains why a guarded update touched no rows.
    fn rejected(conn: &Connection, id: &str, operation: &str) -> VideoStoreError {
        match Self::fetch(conn, id) {
            Ok(Some(video)) => VideoStoreError::InvalidState {
                video_id: id.to_string(),
                current_status: video.transcode_status.to_string(),
                operation: operation.to_string(),
            },
            Ok(None) => VideoStoreError::NotFound(id.to_string()),
            Err(e) => e,
        }
    }
}

impl VideoStore for SqliteVideoStore {
    fn create(&self, request: NewVideo) -> Result<Video, VideoStoreError> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO videos (id, tenant_id, title, description, source_key, size_bytes, transcode_status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                request.id,
                request.tenant_id,
                request.title,
                request.description,
                request.source_key,
                request.size_bytes as i64,
                TranscodeStatus::Pending.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        Ok(Video {
            id: request.id,
            tenant_id: request.tenant_id,
            title: request.title,
            description: request.description,
            source_key: request.source_key,
            size_bytes: request.size_bytes,
            duration_secs: 0.0,
            width: 0,
            height: 0,
            transcode_status: TranscodeStatus::Pending,
            is_transcoded: false,
            cover_key: None,
            transcode_error: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Video>, VideoStoreError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn try_begin_processing(&self, id: &str, claimant: &str) -> Result<bool, VideoStoreError> {
        let conn = self.conn()?;

        let changed = conn
            .execute(
                r#"
                UPDATE videos SET transcode_status = 'processing', transcode_error = NULL, claimed_by = ?1, updated_at = ?2
                WHERE id = ?3
                  AND (transcode_status IN ('pending', 'failed')
                       OR (transcode_status = 'processing' AND claimed_by = ?1))
                "#,
                params![claimant, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        if changed > 0 {
            return Ok(true);
        }

        match Self::fetch(&conn, id)? {
            Some(_) => Ok(false),
            None => Err(VideoStoreError::NotFound(id.to_string())),
        }
    }

    fn release_claim(&self, id: &str, claimant: &str) -> Result<bool, VideoStoreError> {
        let conn = self.conn()?;

        let changed = conn
            .execute(
                "UPDATE videos SET transcode_status = 'pending', claimed_by = NULL, updated_at = ? WHERE id = ? AND transcode_status = 'processing' AND claimed_by = ?",
                params![Utc::now().to_rfc3339(), id, claimant],
            )
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        if changed > 0 {
            return Ok(true);
        }

        match Self::fetch(&conn, id)? {
            Some(_) => Ok(false),
            None => Err(VideoStoreError::NotFound(id.to_string())),
        }
    }

    fn reset_for_retranscode(&self, id: &str) -> Result<bool, VideoStoreError> {
        let conn = self.conn()?;

        let changed = conn
            .execute(
                "UPDATE videos SET transcode_status = 'pending', updated_at = ? WHERE id = ? AND transcode_status IN ('completed', 'failed')",
                params![Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        if changed > 0 {
            return Ok(true);
        }

        match Self::fetch(&conn, id)? {
            Some(_) => Ok(false),
            None => Err(VideoStoreError::NotFound(id.to_string())),
        }
    }

    fn set_cover_key(&self, id: &str, cover_key: &str) -> Result<(), VideoStoreError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE videos SET cover_key = ?, updated_at = ? WHERE id = ?",
                params![cover_key, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(VideoStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn complete_transcode(
        &self,
        id: &str,
        completion: &TranscodeCompletion,
    ) -> Result<(), VideoStoreError> {
        if completion.renditions.is_empty() {
            return Err(VideoStoreError::InvalidState {
                video_id: id.to_string(),
                current_status: TranscodeStatus::Processing.to_string(),
                operation: "complete with zero renditions".to_string(),
            });
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        let changed = tx
            .execute(
                "UPDATE videos SET duration_secs = ?, width = ?, height = ?, size_bytes = ?, is_transcoded = 1, transcode_status = 'completed', transcode_error = NULL, claimed_by = NULL, updated_at = ? WHERE id = ? AND transcode_status = 'processing'",
                params![
                    completion.duration_secs,
                    completion.width,
                    completion.height,
                    completion.size_bytes as i64,
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(Self::rejected(&tx, id, "complete"));
        }

        tx.execute("DELETE FROM video_renditions WHERE video_id = ?", params![id])
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        for (position, rendition) in completion.renditions.iter().enumerate() {
            tx.execute(
                "INSERT INTO video_renditions (video_id, position, name, storage_key, width, height, size_bytes) VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    position as i64,
                    rendition.name,
                    rendition.storage_key,
                    rendition.width,
                    rendition.height,
                    rendition.size_bytes as i64,
                ],
            )
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| VideoStoreError::Database(e.to_string()))
    }

    fn fail_transcode(&self, id: &str, error: &str) -> Result<(), VideoStoreError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE videos SET transcode_status = 'failed', transcode_error = ?, claimed_by = NULL, updated_at = ? WHERE id = ? AND transcode_status = 'processing'",
                params![error, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(Self::rejected(&conn, id, "fail"));
        }
        Ok(())
    }

    fn renditions(&self, id: &str) -> Result<Vec<Rendition>, VideoStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name, storage_key, width, height, size_bytes FROM video_renditions WHERE video_id = ? ORDER BY position ASC")
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![id], |row| {
                Ok(Rendition {
                    name: row.get(0)?,
                    storage_key: row.get(1)?,
                    width: row.get(2)?,
                    height: row.get(3)?,
                    size_bytes: row.get::<_, i64>(4)? as u64,
                })
            })
            .map_err(|e| VideoStoreError::Database(e.to_string()))?;

        let mut renditions = Vec::new();
        for row_result in rows {
            renditions.push(row_result.map_err(|e| VideoStoreError::Database(e.to_string()))?);
        }
        Ok(renditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_video(id: &str) -> SqliteVideoStore {
        let store = SqliteVideoStore::in_memory().unwrap();
        store
            .create(NewVideo::new(id, "tenant-1", format!("uploads/{}.mp4", id)).with_title("clip"))
            .unwrap();
        store
    }

    fn completion() -> TranscodeCompletion {
        TranscodeCompletion {
            duration_secs: 30.0,
            width: 1280,
            height: 720,
            size_bytes: 4096,
            renditions: vec![
                Rendition {
                    name: "720p".to_string(),
                    storage_key: "renditions/v1_720p.mp4".to_string(),
                    width: 1280,
                    height: 720,
                    size_bytes: 4096,
                },
                Rendition {
                    name: "480p".to_string(),
                    storage_key: "renditions/v1_480p.mp4".to_string(),
                    width: 854,
                    height: 480,
                    size_bytes: 2048,
                },
            ],
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = store_with_video("v1");
        let video = store.get("v1").unwrap().unwrap();
        assert_eq!(video.tenant_id, "tenant-1");
        assert_eq!(video.title, "clip");
        assert_eq!(video.transcode_status, TranscodeStatus::Pending);
        assert!(!video.is_transcoded);
        assert!(video.cover_key.is_none());
    }

    #[test]
    fn test_begin_processing_is_single_flight() {
        let store = store_with_video("v1");
        assert!(store.try_begin_processing("v1", "task-1").unwrap());
        assert!(!store.try_begin_processing("v1", "task-2").unwrap());

        let video = store.get("v1").unwrap().unwrap();
        assert_eq!(video.transcode_status, TranscodeStatus::Processing);
        assert_eq!(video.claimed_by.as_deref(), Some("task-1"));
    }

    #[test]
    fn test_claimant_can_reclaim_after_crash() {
        let store = store_with_video("v1");
        assert!(store.try_begin_processing("v1", "task-1").unwrap());

        // The process died mid-run; the redelivered task claims again.
        assert!(store.try_begin_processing("v1", "task-1").unwrap());
        store.complete_transcode("v1", &completion()).unwrap();

        let video = store.get("v1").unwrap().unwrap();
        assert_eq!(video.transcode_status, TranscodeStatus::Completed);
        assert!(video.claimed_by.is_none());
    }

    #[test]
    fn test_release_claim() {
        let store = store_with_video("v1");
        store.try_begin_processing("v1", "task-1").unwrap();

        assert!(!store.release_claim("v1", "task-2").unwrap());
        assert!(store.release_claim("v1", "task-1").unwrap());

        let video = store.get("v1").unwrap().unwrap();
        assert_eq!(video.transcode_status, TranscodeStatus::Pending);
        assert!(video.claimed_by.is_none());
        assert!(!store.release_claim("v1", "task-1").unwrap());

        assert!(matches!(
            store.release_claim("ghost", "task-1"),
            Err(VideoStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_begin_processing_missing_video() {
        let store = SqliteVideoStore::in_memory().unwrap();
        assert!(matches!(
            store.try_begin_processing("ghost", "task-1"),
            Err(VideoStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_video_can_restart() {
        let store = store_with_video("v1");
        store.try_begin_processing("v1", "task-1").unwrap();
        store.fail_transcode("v1", "probe failed").unwrap();

        let video = store.get("v1").unwrap().unwrap();
        assert_eq!(video.transcode_status, TranscodeStatus::Failed);
        assert_eq!(video.transcode_error.as_deref(), Some("probe failed"));

        assert!(store.try_begin_processing("v1", "task-1").unwrap());
        assert!(store.get("v1").unwrap().unwrap().transcode_error.is_none());
    }

    #[test]
    fn test_complete_transcode() {
        let store = store_with_video("v1");
        store.try_begin_processing("v1", "task-1").unwrap();
        store.set_cover_key("v1", "covers/v1.jpg").unwrap();
        store.complete_transcode("v1", &completion()).unwrap();

        let video = store.get("v1").unwrap().unwrap();
        assert_eq!(video.transcode_status, TranscodeStatus::Completed);
        assert!(video.is_transcoded);
        assert_eq!((video.width, video.height), (1280, 720));
        assert_eq!(video.size_bytes, 4096);
        assert_eq!(video.duration_secs, 30.0);
        assert_eq!(video.cover_key.as_deref(), Some("covers/v1.jpg"));

        let renditions = store.renditions("v1").unwrap();
        assert_eq!(renditions.len(), 2);
        assert_eq!(renditions[0].name, "720p");

        // Completed is terminal for this run.
        assert!(!store.try_begin_processing("v1", "task-1").unwrap());
    }

    #[test]
    fn test_reset_for_retranscode() {
        let store = store_with_video("v1");
        // Pending cannot be reset.
        assert!(!store.reset_for_retranscode("v1").unwrap());

        store.try_begin_processing("v1", "task-1").unwrap();
        assert!(!store.reset_for_retranscode("v1").unwrap());

        store.complete_transcode("v1", &completion()).unwrap();
        assert!(store.reset_for_retranscode("v1").unwrap());
        assert_eq!(
            store.get("v1").unwrap().unwrap().transcode_status,
            TranscodeStatus::Pending
        );
        assert!(store.try_begin_processing("v1", "task-1").unwrap());

        assert!(matches!(
            store.reset_for_retranscode("ghost"),
            Err(VideoStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_complete_requires_processing() {
        let store = store_with_video("v1");
        let err = store.complete_transcode("v1", &completion()).unwrap_err();
        assert!(matches!(err, VideoStoreError::InvalidState { .. }));
    }

    #[test]
    fn test_complete_rejects_empty_renditions() {
        let store = store_with_video("v1");
        store.try_begin_processing("v1", "task-1").unwrap();
        let mut empty = completion();
        empty.renditions.clear();
        assert!(store.complete_transcode("v1", &empty).is_err());
        assert_eq!(
            store.get("v1").unwrap().unwrap().transcode_status,
            TranscodeStatus::Processing
        );
    }

    #[test]
    fn test_fail_requires_processing() {
        let store = store_with_video("v1");
        assert!(matches!(
            store.fail_transcode("v1", "x"),
            Err(VideoStoreError::InvalidState { .. })
        ));
        assert!(matches!(
            store.fail_transcode("ghost", "x"),
            Err(VideoStoreError::NotFound(_))
        ));
    }
}
