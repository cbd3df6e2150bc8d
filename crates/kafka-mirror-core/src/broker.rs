//! Broker capability surface.
//!
//! The mirror core never speaks the Kafka wire protocol itself. Everything it
//! needs from a cluster (produce, consume, admin) is expressed as the
//! [`BrokerClient`] trait, implemented by real-cluster adapters (rdkafka in
//! the CLI crate) and by the in-memory cluster in [`crate::testing`].

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A (topic, partition) pair within one cluster.
///
/// Not comparable across clusters without going through the replication
/// policy's rename function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Topic name plus partition count, as reported by cluster metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: i32,
}

/// A record read back from a partition, positioned at `offset`.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Bytes,
}

/// Milliseconds since the Unix epoch, for heartbeat/checkpoint timestamps.
#[must_use]
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Capability surface required from a cluster.
///
/// All operations are async and bounded: implementations must enforce their
/// own request timeouts so the polling tasks' cancellation contract holds.
/// Errors are transient from the caller's perspective; tasks retry with
/// backoff on the next tick.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// List all topics with their partition counts.
    async fn list_topics(&self) -> Result<Vec<TopicMetadata>>;

    /// Create a topic with the given partition count and configuration.
    ///
    /// Creating a topic that already exists is not an error.
    async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        configs: HashMap<String, String>,
    ) -> Result<()>;

    /// Partition count for a topic, or `None` if the topic does not exist.
    async fn partition_count(&self, topic: &str) -> Result<Option<i32>>;

    /// Raise a topic's partition count to `total`. No-op if already there.
    async fn create_partitions(&self, topic: &str, total: i32) -> Result<()>;

    /// Current (non-default) configuration of a topic.
    async fn describe_topic_config(&self, topic: &str) -> Result<HashMap<String, String>>;

    /// Overwrite the given configuration entries on a topic.
    async fn alter_topic_config(
        &self,
        topic: &str,
        configs: HashMap<String, String>,
    ) -> Result<()>;

    /// Append one record to a partition; returns the offset it landed at.
    async fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<i64>;

    /// Read up to `max_records` records starting at `from_offset`.
    ///
    /// Returns an empty vector when the partition has no records at or past
    /// `from_offset`.
    async fn consume(
        &self,
        tp: &TopicPartition,
        from_offset: i64,
        max_records: usize,
    ) -> Result<Vec<ConsumedRecord>>;

    /// Log-end offset of a partition (offset the next record will get).
    async fn end_offset(&self, tp: &TopicPartition) -> Result<i64>;

    /// All consumer group ids known to the cluster.
    async fn list_groups(&self) -> Result<Vec<String>>;

    /// Committed offsets for a group, keyed by partition.
    ///
    /// Groups with no commits yield an empty map.
    async fn committed_offsets(&self, group: &str) -> Result<HashMap<TopicPartition, i64>>;

    /// Overwrite committed offsets for a group.
    async fn alter_group_offsets(
        &self,
        group: &str,
        offsets: &HashMap<TopicPartition, i64>,
    ) -> Result<()>;

    /// Whether the group currently has active members on this cluster.
    async fn group_has_active_members(&self, group: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_partition_display() {
        let tp = TopicPartition::new("orders", 3);
        assert_eq!(tp.to_string(), "orders-3");
    }

    #[test]
    fn topic_partition_ordering_groups_by_topic() {
        let mut tps = vec![
            TopicPartition::new("b", 0),
            TopicPartition::new("a", 1),
            TopicPartition::new("a", 0),
        ];
        tps.sort();
        assert_eq!(tps[0], TopicPartition::new("a", 0));
        assert_eq!(tps[1], TopicPartition::new("a", 1));
        assert_eq!(tps[2], TopicPartition::new("b", 0));
    }

    #[test]
    fn unix_millis_is_positive() {
        assert!(unix_millis() > 0);
    }
}
