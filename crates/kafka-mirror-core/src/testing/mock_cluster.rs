//! In-memory cluster for integration testing.
//!
//! Implements the full [`BrokerClient`] surface over plain maps: topics are
//! vectors of partitions, partitions are append-only record logs, groups
//! are committed-offset maps. Offsets behave like the real thing:
//! sequential per partition, log-end is the next offset to be assigned.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::broker::{BrokerClient, ConsumedRecord, TopicMetadata, TopicPartition};
use crate::error::{MirrorError, Result};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    value: Bytes,
}

#[derive(Debug, Default)]
struct MockTopic {
    partitions: Vec<Vec<StoredRecord>>,
    configs: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct GroupState {
    offsets: HashMap<TopicPartition, i64>,
    active_members: usize,
}

#[derive(Debug, Default)]
struct ClusterState {
    topics: HashMap<String, MockTopic>,
    groups: HashMap<String, GroupState>,
}

/// An in-memory cluster.
#[derive(Debug)]
pub struct MockCluster {
    name: String,
    state: RwLock<ClusterState>,
}

impl MockCluster {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(ClusterState::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn broker_error(&self, message: impl Into<String>) -> MirrorError {
        MirrorError::Broker {
            cluster: self.name.clone(),
            message: message.into(),
        }
    }

    // Test-side helpers, not part of the capability surface.

    /// Append string payloads to a partition; the topic must exist.
    pub async fn produce_values(
        &self,
        topic: &str,
        partition: i32,
        values: impl IntoIterator<Item = &str>,
    ) {
        for value in values {
            self.produce(topic, partition, None, Bytes::copy_from_slice(value.as_bytes()))
                .await
                .expect("produce_values requires an existing topic/partition");
        }
    }

    /// Every payload currently in a partition, in log order.
    pub async fn partition_values(&self, tp: &TopicPartition) -> Vec<Bytes> {
        let state = self.state.read().await;
        state
            .topics
            .get(&tp.topic)
            .and_then(|t| t.partitions.get(tp.partition as usize))
            .map(|p| p.iter().map(|r| r.value.clone()).collect())
            .unwrap_or_default()
    }

    /// Commit a consumer-group offset, creating the group if needed.
    pub async fn commit_offset(&self, group: &str, tp: TopicPartition, offset: i64) {
        let mut state = self.state.write().await;
        state
            .groups
            .entry(group.to_string())
            .or_default()
            .offsets
            .insert(tp, offset);
    }

    /// Mark a group as having (or not having) active members.
    pub async fn set_group_active(&self, group: &str, active: bool) {
        let mut state = self.state.write().await;
        let entry = state.groups.entry(group.to_string()).or_default();
        entry.active_members = usize::from(active);
    }

    /// Current configuration of a topic, if it exists.
    pub async fn topic_config(&self, topic: &str) -> Option<HashMap<String, String>> {
        let state = self.state.read().await;
        state.topics.get(topic).map(|t| t.configs.clone())
    }

    /// Whether a topic exists on this cluster.
    pub async fn has_topic(&self, topic: &str) -> bool {
        self.state.read().await.topics.contains_key(topic)
    }
}

#[async_trait]
impl BrokerClient for MockCluster {
    async fn list_topics(&self) -> Result<Vec<TopicMetadata>> {
        let state = self.state.read().await;
        Ok(state
            .topics
            .iter()
            .map(|(name, topic)| TopicMetadata {
                name: name.clone(),
                partitions: topic.partitions.len() as i32,
            })
            .collect())
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        configs: HashMap<String, String>,
    ) -> Result<()> {
        if partitions < 1 {
            return Err(self.broker_error(format!("invalid partition count {partitions}")));
        }
        let mut state = self.state.write().await;
        state.topics.entry(name.to_string()).or_insert_with(|| MockTopic {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            configs,
        });
        Ok(())
    }

    async fn partition_count(&self, topic: &str) -> Result<Option<i32>> {
        let state = self.state.read().await;
        Ok(state.topics.get(topic).map(|t| t.partitions.len() as i32))
    }

    async fn create_partitions(&self, topic: &str, total: i32) -> Result<()> {
        let mut state = self.state.write().await;
        let mock = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| MirrorError::TopicNotFound {
                topic: topic.to_string(),
            })?;
        while (mock.partitions.len() as i32) < total {
            mock.partitions.push(Vec::new());
        }
        Ok(())
    }

    async fn describe_topic_config(&self, topic: &str) -> Result<HashMap<String, String>> {
        let state = self.state.read().await;
        state
            .topics
            .get(topic)
            .map(|t| t.configs.clone())
            .ok_or_else(|| MirrorError::TopicNotFound {
                topic: topic.to_string(),
            })
    }

    async fn alter_topic_config(
        &self,
        topic: &str,
        configs: HashMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let mock = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| MirrorError::TopicNotFound {
                topic: topic.to_string(),
            })?;
        mock.configs.extend(configs);
        Ok(())
    }

    async fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<i64> {
        let mut state = self.state.write().await;
        let mock = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| MirrorError::TopicNotFound {
                topic: topic.to_string(),
            })?;
        let log = mock
            .partitions
            .get_mut(partition as usize)
            .ok_or_else(|| MirrorError::PartitionOutOfRange {
                topic: topic.to_string(),
                partition,
            })?;
        log.push(StoredRecord { key, value });
        Ok(log.len() as i64 - 1)
    }

    async fn consume(
        &self,
        tp: &TopicPartition,
        from_offset: i64,
        max_records: usize,
    ) -> Result<Vec<ConsumedRecord>> {
        let state = self.state.read().await;
        let mock = state
            .topics
            .get(&tp.topic)
            .ok_or_else(|| MirrorError::TopicNotFound {
                topic: tp.topic.clone(),
            })?;
        let log = mock
            .partitions
            .get(tp.partition as usize)
            .ok_or_else(|| MirrorError::PartitionOutOfRange {
                topic: tp.topic.clone(),
                partition: tp.partition,
            })?;

        let start = from_offset.max(0) as usize;
        Ok(log
            .iter()
            .enumerate()
            .skip(start)
            .take(max_records)
            .map(|(offset, record)| ConsumedRecord {
                offset: offset as i64,
                key: record.key.clone(),
                value: record.value.clone(),
            })
            .collect())
    }

    async fn end_offset(&self, tp: &TopicPartition) -> Result<i64> {
        let state = self.state.read().await;
        let mock = state
            .topics
            .get(&tp.topic)
            .ok_or_else(|| MirrorError::TopicNotFound {
                topic: tp.topic.clone(),
            })?;
        let log = mock
            .partitions
            .get(tp.partition as usize)
            .ok_or_else(|| MirrorError::PartitionOutOfRange {
                topic: tp.topic.clone(),
                partition: tp.partition,
            })?;
        Ok(log.len() as i64)
    }

    async fn list_groups(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.groups.keys().cloned().collect())
    }

    async fn committed_offsets(&self, group: &str) -> Result<HashMap<TopicPartition, i64>> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .get(group)
            .map(|g| g.offsets.clone())
            .unwrap_or_default())
    }

    async fn alter_group_offsets(
        &self,
        group: &str,
        offsets: &HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state.groups.entry(group.to_string()).or_default();
        if entry.active_members > 0 {
            return Err(self.broker_error(format!("group '{group}' has active members")));
        }
        for (tp, offset) in offsets {
            entry.offsets.insert(tp.clone(), *offset);
        }
        Ok(())
    }

    async fn group_has_active_members(&self, group: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .get(group)
            .map(|g| g.active_members > 0)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produce_assigns_sequential_offsets() {
        let cluster = MockCluster::new("test");
        cluster
            .create_topic("orders", 2, HashMap::new())
            .await
            .unwrap();

        for i in 0..5 {
            let offset = cluster
                .produce("orders", 0, None, Bytes::from(format!("r{i}")))
                .await
                .unwrap();
            assert_eq!(offset, i);
        }
        let tp = TopicPartition::new("orders", 0);
        assert_eq!(cluster.end_offset(&tp).await.unwrap(), 5);
        assert_eq!(
            cluster.end_offset(&TopicPartition::new("orders", 1)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn consume_honors_offset_and_bounds() {
        let cluster = MockCluster::new("test");
        cluster
            .create_topic("orders", 1, HashMap::new())
            .await
            .unwrap();
        cluster
            .produce_values("orders", 0, ["a", "b", "c", "d"])
            .await;

        let tp = TopicPartition::new("orders", 0);
        let records = cluster.consume(&tp, 1, 2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 1);
        assert_eq!(records[0].value, Bytes::from("b"));
        assert_eq!(records[1].offset, 2);

        assert!(cluster.consume(&tp, 4, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_topic_is_idempotent() {
        let cluster = MockCluster::new("test");
        cluster
            .create_topic("orders", 3, HashMap::new())
            .await
            .unwrap();
        cluster
            .produce_values("orders", 0, ["keep-me"])
            .await;
        cluster
            .create_topic("orders", 5, HashMap::new())
            .await
            .unwrap();

        assert_eq!(cluster.partition_count("orders").await.unwrap(), Some(3));
        let tp = TopicPartition::new("orders", 0);
        assert_eq!(cluster.end_offset(&tp).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn group_offsets_round_trip() {
        let cluster = MockCluster::new("test");
        let tp = TopicPartition::new("orders", 0);
        cluster.commit_offset("billing", tp.clone(), 42).await;

        let committed = cluster.committed_offsets("billing").await.unwrap();
        assert_eq!(committed.get(&tp), Some(&42));
        assert!(cluster.committed_offsets("nobody").await.unwrap().is_empty());
        assert!(cluster.list_groups().await.unwrap().contains(&"billing".to_string()));
    }

    #[tokio::test]
    async fn alter_group_offsets_refuses_active_groups() {
        let cluster = MockCluster::new("test");
        cluster.set_group_active("billing", true).await;

        let mut offsets = HashMap::new();
        offsets.insert(TopicPartition::new("orders", 0), 10);
        assert!(cluster.alter_group_offsets("billing", &offsets).await.is_err());

        cluster.set_group_active("billing", false).await;
        cluster.alter_group_offsets("billing", &offsets).await.unwrap();
        assert!(!cluster.group_has_active_members("billing").await.unwrap());
    }

    #[tokio::test]
    async fn missing_topics_error() {
        let cluster = MockCluster::new("test");
        let tp = TopicPartition::new("ghost", 0);
        assert!(matches!(
            cluster.consume(&tp, 0, 10).await,
            Err(MirrorError::TopicNotFound { .. })
        ));
        assert!(matches!(
            cluster.produce("ghost", 0, None, Bytes::new()).await,
            Err(MirrorError::TopicNotFound { .. })
        ));
        assert_eq!(cluster.partition_count("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn partition_expansion_keeps_existing_logs() {
        let cluster = MockCluster::new("test");
        cluster
            .create_topic("orders", 1, HashMap::new())
            .await
            .unwrap();
        cluster.produce_values("orders", 0, ["a"]).await;

        cluster.create_partitions("orders", 3).await.unwrap();
        assert_eq!(cluster.partition_count("orders").await.unwrap(), Some(3));
        let tp = TopicPartition::new("orders", 0);
        assert_eq!(cluster.end_offset(&tp).await.unwrap(), 1);
    }
}
