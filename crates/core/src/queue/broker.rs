//! Stream broker abstraction.
//!
//! A broker is a partitioned, durable, ordered log. Producers publish keyed
//! records; consumer groups read each partition in order and commit offsets
//! explicitly. Records with the same key always land in the same partition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::error::BrokerError;

/// Name of the process-wide dead-letter stream.
pub const DEAD_LETTER_STREAM: &str = "dead-letter";

/// A record read back from a stream partition.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    /// Monotonic sequence number, used as the committed offset.
    pub seq: i64,
    pub stream: String,
    pub partition: u32,
    pub key: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

/// Partitioned log transport used by the task queue and event publisher.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Number of partitions per stream.
    fn partitions(&self) -> u32;

    /// Append a record to `stream`, keyed for partition affinity.
    async fn publish(&self, stream: &str, key: &str, payload: &[u8]) -> Result<i64, BrokerError>;

    /// Read up to `limit` records past the group's committed offset, in order.
    async fn fetch(
        &self,
        stream: &str,
        group: &str,
        partition: u32,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, BrokerError> {
        self.fetch_after(stream, group, partition, 0, limit).await
    }

    /// Like [`Broker::fetch`], but also skips records at or below `after`.
    ///
    /// Lets a consumer scan ahead of its committed offset while earlier
    /// records stay uncommitted.
    async fn fetch_after(
        &self,
        stream: &str,
        group: &str,
        partition: u32,
        after: i64,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, BrokerError>;

    /// Advance the group's committed offset. Never moves backwards.
    async fn commit(
        &self,
        stream: &str,
        group: &str,
        partition: u32,
        seq: i64,
    ) -> Result<(), BrokerError>;
}

/// Stable partition assignment for a record key.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable() {
        let a = partition_for("video-42", 8);
        let b = partition_for("video-42", 8);
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn test_single_partition() {
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn test_keys_spread_across_partitions() {
        let used: std::collections::HashSet<u32> =
            (0..64).map(|i| partition_for(&format!("key-{}", i), 4)).collect();
        assert!(used.len() > 1);
    }
}
