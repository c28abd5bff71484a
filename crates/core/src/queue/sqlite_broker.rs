//! SQLite-backed stream broker.

use std::path::Path;
use std::time::Duration;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::broker::{partition_for, Broker, StreamRecord};
use super::error::BrokerError;

/// Partitioned log stored in SQLite.
///
/// Every stream shares one table; offsets are tracked per
/// (stream, consumer group, partition).
pub struct SqliteBroker {
    conn: Mutex<Connection>,
    partitions: u32,
}

impl SqliteBroker {
    /// Open (or create) a broker database at `path`.
    pub fn new(path: &Path, partitions: u32) -> Result<Self, BrokerError> {
        let conn = Connection::open(path).map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            partitions: partitions.max(1),
        })
    }

    /// Create an in-memory broker (useful for testing).
    pub fn in_memory(partitions: u32) -> Result<Self, BrokerError> {
        let conn =
            Connection::open_in_memory().map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            partitions: partitions.max(1),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), BrokerError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS stream_records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                stream TEXT NOT NULL,
                partition_id INTEGER NOT NULL,
                record_key TEXT NOT NULL,
                payload BLOB NOT NULL,
                published_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_stream_records_read
                ON stream_records(stream, partition_id, seq);

            CREATE TABLE IF NOT EXISTS stream_offsets (
                stream TEXT NOT NULL,
                consumer_group TEXT NOT NULL,
                partition_id INTEGER NOT NULL,
                committed_seq INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (stream, consumer_group, partition_id)
            );
            "#,
        )
        .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, BrokerError> {
        self.conn
            .lock()
            .map_err(|_| BrokerError::Unavailable("broker connection lock poisoned".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StreamRecord> {
        let published_at_str: String = row.get(5)?;
        let published_at = DateTime::parse_from_rfc3339(&published_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(StreamRecord {
            seq: row.get(0)?,
            stream: row.get(1)?,
            partition: row.get(2)?,
            key: row.get(3)?,
            payload: row.get(4)?,
            published_at,
        })
    }

    /// Total records ever published to `stream`, across partitions.
    pub fn stream_len(&self, stream: &str) -> Result<i64, BrokerError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM stream_records WHERE stream = ?",
            params![stream],
            |row| row.get(0),
        )
        .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn publish(&self, stream: &str, key: &str, payload: &[u8]) -> Result<i64, BrokerError> {
        let partition = partition_for(key, self.partitions);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO stream_records (stream, partition_id, record_key, payload, published_at) VALUES (?, ?, ?, ?, ?)",
            params![stream, partition, key, payload, Utc::now().to_rfc3339()],
        )
        .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    async fn fetch_after(
        &self,
        stream: &str,
        group: &str,
        partition: u32,
        after: i64,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, BrokerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT seq, stream, partition_id, record_key, payload, published_at
                FROM stream_records
                WHERE stream = ?1 AND partition_id = ?2
                  AND seq > ?4
                  AND seq > COALESCE(
                      (SELECT committed_seq FROM stream_offsets
                       WHERE stream = ?1 AND consumer_group = ?3 AND partition_id = ?2),
                      0)
                ORDER BY seq ASC
                LIMIT ?5
                "#,
            )
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![stream, partition, group, after, limit as i64],
                Self::row_to_record,
            )
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            records.push(row_result.map_err(|e| BrokerError::Unavailable(e.to_string()))?);
        }
        Ok(records)
    }

    async fn commit(
        &self,
        stream: &str,
        group: &str,
        partition: u32,
        seq: i64,
    ) -> Result<(), BrokerError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO stream_offsets (stream, consumer_group, partition_id, committed_seq, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(stream, consumer_group, partition_id) DO UPDATE SET
                committed_seq = MAX(committed_seq, excluded.committed_seq),
                updated_at = excluded.updated_at
            "#,
            params![stream, group, partition, seq, Utc::now().to_rfc3339()],
        )
        .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
