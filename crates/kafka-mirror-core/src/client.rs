//! Read-only query facade over the internal topics.
//!
//! Failover tooling points this at a cluster and asks three questions: which
//! clusters replicate into it, how far away they are, and where a consumer
//! group should resume after moving here. Everything is answered from the
//! heartbeats and checkpoints topics; nothing is ever written.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::broker::{BrokerClient, TopicPartition};
use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::heartbeat::{read_topology, TopologyGraph};
use crate::policy::ReplicationPolicy;

/// Batch size for reading internal topics.
const READ_BATCH: usize = 500;

/// Read-only client for one cluster's view of the replication topology.
pub struct RemoteClusterClient {
    client: Arc<dyn BrokerClient>,
    policy: ReplicationPolicy,
    local_alias: String,
}

impl RemoteClusterClient {
    #[must_use]
    pub fn new(
        client: Arc<dyn BrokerClient>,
        policy: ReplicationPolicy,
        local_alias: impl Into<String>,
    ) -> Self {
        Self {
            client,
            policy,
            local_alias: local_alias.into(),
        }
    }

    /// Translated committed offsets for `group`, as mirrored from
    /// `remote_alias` into this cluster.
    ///
    /// Consumes the checkpoints topic up to its current end, or until
    /// `timeout` elapses, keeping the newest checkpoint per partition. Keys
    /// are the *remote* topic names (`"<alias>.<topic>"`), which is what a
    /// consumer resuming on this cluster subscribes to.
    ///
    /// # Errors
    ///
    /// Propagates broker errors; a missing checkpoints topic yields an
    /// empty map (nothing has been checkpointed yet).
    pub async fn remote_consumer_offsets(
        &self,
        group: &str,
        remote_alias: &str,
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>> {
        let deadline = Instant::now() + timeout;
        let topic = self.policy.checkpoints_topic(remote_alias);

        let Some(partitions) = self.client.partition_count(&topic).await? else {
            return Ok(HashMap::new());
        };

        let mut latest: HashMap<TopicPartition, i64> = HashMap::new();
        for partition in 0..partitions {
            let tp = TopicPartition::new(topic.clone(), partition);
            let end = self.client.end_offset(&tp).await?;
            let mut offset = 0;
            while offset < end && Instant::now() < deadline {
                let records = self.client.consume(&tp, offset, READ_BATCH).await?;
                if records.is_empty() {
                    break;
                }
                for record in &records {
                    let Ok(cp) = serde_json::from_slice::<Checkpoint>(&record.value) else {
                        debug!(topic = %tp.topic, offset = record.offset, "skipping undecodable checkpoint");
                        continue;
                    };
                    if cp.consumer_group_id != group {
                        continue;
                    }
                    // Later records supersede earlier ones for the same
                    // partition; the emitter guarantees they never regress.
                    let remote_tp = self
                        .policy
                        .remote_topic_partition(remote_alias, &cp.topic_partition());
                    latest.insert(remote_tp, cp.downstream_offset);
                }
                offset = records.last().map_or(end, |r| r.offset + 1);
            }
        }
        Ok(latest)
    }

    /// Aliases of every cluster with a replication path into this one.
    ///
    /// # Errors
    ///
    /// Propagates broker errors from reading the heartbeat topics.
    pub async fn upstream_clusters(&self) -> Result<BTreeSet<String>> {
        let graph = self.topology().await?;
        Ok(graph.upstream_clusters(&self.local_alias))
    }

    /// Shortest replication distance from `remote_alias` into this cluster,
    /// or `None` when no heartbeat path exists.
    ///
    /// # Errors
    ///
    /// Propagates broker errors from reading the heartbeat topics.
    pub async fn replication_hops(&self, remote_alias: &str) -> Result<Option<u32>> {
        let graph = self.topology().await?;
        Ok(graph.replication_hops(&self.local_alias, remote_alias))
    }

    /// The topology graph as currently observable from this cluster.
    ///
    /// # Errors
    ///
    /// Propagates broker errors from reading the heartbeat topics.
    pub async fn topology(&self) -> Result<TopologyGraph> {
        read_topology(&self.client, &self.policy).await
    }
}
