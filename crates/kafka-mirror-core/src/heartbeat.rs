//! Heartbeat emission and replication topology discovery.
//!
//! Every flow emits a heartbeat record on a fixed interval to its target
//! cluster's `heartbeats` topic, establishing a directed (source, target)
//! edge. Heartbeats topics are themselves mirrored, so each cluster
//! accumulates the heartbeat history of its upstreams under alias-chained
//! topic names, and the union of all records readable locally is the
//! replication topology as seen from that cluster. Edges are never
//! retracted; absence of recent heartbeats is what expiry looks like.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broker::{unix_millis, BrokerClient};
use crate::error::Result;
use crate::metrics::MirrorMetrics;
use crate::policy::HEARTBEATS_TOPIC;

/// One directed liveness edge between two clusters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub source_cluster_alias: String,
    pub target_cluster_alias: String,
    pub timestamp_ms: i64,
}

impl Heartbeat {
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_cluster_alias: source.into(),
            target_cluster_alias: target.into(),
            timestamp_ms: unix_millis(),
        }
    }
}

/// Directed reachability graph built from observed heartbeat edges.
#[derive(Debug, Default, Clone)]
pub struct TopologyGraph {
    edges: BTreeSet<(String, String)>,
}

impl TopologyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a stream of heartbeat records.
    #[must_use]
    pub fn from_heartbeats(heartbeats: impl IntoIterator<Item = Heartbeat>) -> Self {
        let mut graph = Self::new();
        for hb in heartbeats {
            graph.insert(&hb);
        }
        graph
    }

    pub fn insert(&mut self, heartbeat: &Heartbeat) {
        self.edges.insert((
            heartbeat.source_cluster_alias.clone(),
            heartbeat.target_cluster_alias.clone(),
        ));
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Length of the shortest replication path carrying records from
    /// `remote_alias` into `local_alias`.
    ///
    /// A direct heartbeat edge is one hop. `None` when no path exists,
    /// never a numeric default.
    #[must_use]
    pub fn replication_hops(&self, local_alias: &str, remote_alias: &str) -> Option<u32> {
        if local_alias == remote_alias {
            return None;
        }
        // Walk upstream from the local cluster: an edge (s, t) means s
        // replicates into t, so predecessors of t are one hop further away.
        let mut distance: BTreeMap<&str, u32> = BTreeMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        distance.insert(local_alias, 0);
        queue.push_back(local_alias);

        while let Some(current) = queue.pop_front() {
            let next_hop = distance[current] + 1;
            for (source, target) in &self.edges {
                if target.as_str() == current && !distance.contains_key(source.as_str()) {
                    if source.as_str() == remote_alias {
                        return Some(next_hop);
                    }
                    distance.insert(source.as_str(), next_hop);
                    queue.push_back(source.as_str());
                }
            }
        }
        None
    }

    /// All aliases with a replication path into `local_alias`.
    #[must_use]
    pub fn upstream_clusters(&self, local_alias: &str) -> BTreeSet<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(local_alias);
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        visited.insert(local_alias);

        while let Some(current) = queue.pop_front() {
            for (source, target) in &self.edges {
                if target.as_str() == current && visited.insert(source.as_str()) {
                    seen.insert(source.clone());
                    queue.push_back(source.as_str());
                }
            }
        }
        seen
    }
}

/// Periodic task emitting heartbeats for one replication direction.
pub struct HeartbeatEmitter {
    target: Arc<dyn BrokerClient>,
    source_alias: String,
    target_alias: String,
    interval: Duration,
    metrics: Arc<MirrorMetrics>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HeartbeatEmitter {
    #[must_use]
    pub fn new(
        target: Arc<dyn BrokerClient>,
        source_alias: impl Into<String>,
        target_alias: impl Into<String>,
        interval: Duration,
        metrics: Arc<MirrorMetrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            target,
            source_alias: source_alias.into(),
            target_alias: target_alias.into(),
            interval,
            metrics,
            shutdown_rx,
        }
    }

    /// Run until a shutdown signal is observed.
    pub async fn run(mut self) {
        info!(
            source = %self.source_alias,
            target = %self.target_alias,
            interval_secs = self.interval.as_secs_f64(),
            "starting heartbeat emitter"
        );

        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.emit_once().await {
                        warn!(error = %e, "failed to emit heartbeat");
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(source = %self.source_alias, "heartbeat emitter shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Emit a single heartbeat to the target's heartbeats topic.
    pub async fn emit_once(&self) -> Result<()> {
        let heartbeat = Heartbeat::new(&self.source_alias, &self.target_alias);
        let key = serde_json::to_vec(&(
            &heartbeat.source_cluster_alias,
            &heartbeat.target_cluster_alias,
        ))?;
        let value = serde_json::to_vec(&heartbeat)?;

        let offset = self
            .target
            .produce(HEARTBEATS_TOPIC, 0, Some(Bytes::from(key)), Bytes::from(value))
            .await?;
        self.metrics.heartbeats_emitted.inc();
        debug!(
            source = %self.source_alias,
            target = %self.target_alias,
            offset,
            "emitted heartbeat"
        );
        Ok(())
    }
}

/// Read every record of each heartbeats topic on a cluster and assemble the
/// topology graph they describe.
pub async fn read_topology(
    client: &Arc<dyn BrokerClient>,
    policy: &crate::policy::ReplicationPolicy,
) -> Result<TopologyGraph> {
    let mut graph = TopologyGraph::new();
    for topic in client.list_topics().await? {
        if !policy.is_heartbeats_topic(&topic.name) {
            continue;
        }
        for partition in 0..topic.partitions {
            let tp = crate::broker::TopicPartition::new(topic.name.clone(), partition);
            let end = client.end_offset(&tp).await?;
            let mut offset = 0;
            while offset < end {
                let records = client.consume(&tp, offset, 500).await?;
                if records.is_empty() {
                    break;
                }
                for record in &records {
                    match serde_json::from_slice::<Heartbeat>(&record.value) {
                        Ok(hb) => graph.insert(&hb),
                        Err(e) => {
                            debug!(topic = %tp.topic, error = %e, "skipping undecodable heartbeat")
                        }
                    }
                }
                offset = records.last().map_or(end, |r| r.offset + 1);
            }
        }
    }
    Ok(graph)
}
