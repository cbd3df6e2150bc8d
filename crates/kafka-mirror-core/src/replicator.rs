//! Record replication between clusters.
//!
//! Each flow runs `tasks_max` replicator tasks; partitions are spread over
//! the tasks by a stable hash, so exactly one task owns any given source
//! partition. The owning task copies records in order, creates and
//! config-syncs the renamed remote topic, and is the sole writer of offset
//! sync points for its partitions.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, TopicPartition};
use crate::discovery::FlowState;
use crate::error::Result;
use crate::flow::FlowSettings;
use crate::metrics::MirrorMetrics;
use crate::sync::{OffsetSync, OffsetSyncStore};

/// Upper bound on records moved per partition per poll.
const MAX_POLL_RECORDS: usize = 500;

/// Cap for the error backoff between polls.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Read an offset-syncs topic end to end, for store rebuilds on startup.
///
/// A missing topic yields an empty list: nothing has been synced yet.
pub async fn read_offset_syncs(
    client: &Arc<dyn BrokerClient>,
    topic: &str,
) -> Result<Vec<OffsetSync>> {
    let Some(partitions) = client.partition_count(topic).await? else {
        return Ok(Vec::new());
    };
    let mut syncs = Vec::new();
    for partition in 0..partitions {
        let tp = TopicPartition::new(topic, partition);
        let end = client.end_offset(&tp).await?;
        let mut offset = 0;
        while offset < end {
            let records = client.consume(&tp, offset, MAX_POLL_RECORDS).await?;
            if records.is_empty() {
                break;
            }
            for record in &records {
                match serde_json::from_slice::<OffsetSync>(&record.value) {
                    Ok(sync) => syncs.push(sync),
                    Err(e) => debug!(topic, error = %e, "skipping undecodable offset sync"),
                }
            }
            offset = records.last().map_or(end, |r| r.offset + 1);
        }
    }
    Ok(syncs)
}

/// One replication task of a flow.
pub struct TopicReplicator {
    source: Arc<dyn BrokerClient>,
    target: Arc<dyn BrokerClient>,
    syncs_client: Arc<dyn BrokerClient>,
    settings: Arc<FlowSettings>,
    state: Arc<FlowState>,
    store: Arc<OffsetSyncStore>,
    metrics: Arc<MirrorMetrics>,
    slot: usize,
    shutdown_rx: watch::Receiver<bool>,

    /// Next source offset to read, per owned partition.
    cursors: HashMap<TopicPartition, i64>,
    /// Source offset of the newest emitted sync point, per owned partition.
    last_synced: HashMap<TopicPartition, i64>,
    /// Source topics whose remote counterpart has been created, with the
    /// partition count it was ensured at.
    ensured: HashMap<String, i32>,
    consecutive_errors: u32,
}

impl TopicReplicator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        source: Arc<dyn BrokerClient>,
        target: Arc<dyn BrokerClient>,
        syncs_client: Arc<dyn BrokerClient>,
        settings: Arc<FlowSettings>,
        state: Arc<FlowState>,
        store: Arc<OffsetSyncStore>,
        metrics: Arc<MirrorMetrics>,
        slot: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            target,
            syncs_client,
            settings,
            state,
            store,
            metrics,
            slot,
            shutdown_rx,
            cursors: HashMap::new(),
            last_synced: HashMap::new(),
            ensured: HashMap::new(),
            consecutive_errors: 0,
        }
    }

    /// Run until a shutdown signal is observed.
    pub async fn run(mut self) {
        info!(
            flow = %self.settings.name(),
            slot = self.slot,
            "starting replicator task"
        );

        let mut interval = tokio::time::interval(self.settings.poll_timeout);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let had_errors = self.poll_once().await;
                    if had_errors {
                        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                        // Back off without blocking shutdown.
                        let delay = self.backoff_delay();
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            _ = self.shutdown_rx.changed() => {}
                        }
                    } else {
                        self.consecutive_errors = 0;
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(flow = %self.settings.name(), slot = self.slot, "replicator shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Capped exponential backoff with jitter after failed polls.
    fn backoff_delay(&self) -> Duration {
        let exp = self.consecutive_errors.min(6);
        let base = self.settings.poll_timeout.saturating_mul(1u32 << exp);
        let capped = base.min(BACKOFF_CAP);
        capped.mul_f64(0.5 + rand::random::<f64>() * 0.5)
    }

    /// One pass over every owned partition. Returns whether any partition
    /// failed; failures never halt the sibling partitions.
    pub async fn poll_once(&mut self) -> bool {
        let mut had_errors = false;
        for tp in self.owned_partitions().await {
            let timer = std::time::Instant::now();
            if let Err(e) = self.replicate_partition(&tp).await {
                warn!(
                    flow = %self.settings.name(),
                    partition = %tp,
                    error = %e,
                    "replication poll failed"
                );
                had_errors = true;
            }
            self.metrics
                .replication_poll_seconds
                .with_label_values(&[&self.settings.name()])
                .observe(timer.elapsed().as_secs_f64());
        }
        had_errors
    }

    /// Source partitions this slot is responsible for.
    async fn owned_partitions(&self) -> Vec<TopicPartition> {
        let mut owned = Vec::new();
        for topic in self.state.topics() {
            let count = match self.source.partition_count(&topic).await {
                Ok(Some(count)) => count,
                Ok(None) => continue,
                Err(e) => {
                    debug!(topic = %topic, error = %e, "partition count lookup failed");
                    continue;
                }
            };
            for partition in 0..count {
                let tp = TopicPartition::new(topic.clone(), partition);
                if self.owns(&tp) {
                    owned.push(tp);
                }
            }
        }
        owned
    }

    fn owns(&self, tp: &TopicPartition) -> bool {
        let mut hasher = DefaultHasher::new();
        tp.hash(&mut hasher);
        (hasher.finish() as usize) % self.settings.tasks_max == self.slot
    }

    /// Copy one batch from a source partition to its remote counterpart.
    async fn replicate_partition(&mut self, tp: &TopicPartition) -> Result<()> {
        let remote_topic = self
            .settings
            .policy
            .remote_topic(&self.settings.source_alias, &tp.topic);

        self.ensure_remote_topic(&tp.topic, &remote_topic).await?;

        let cursor = match self.cursors.get(tp) {
            Some(&cursor) => cursor,
            None => {
                let cursor = self.initial_cursor(tp, &remote_topic).await?;
                self.cursors.insert(tp.clone(), cursor);
                cursor
            }
        };

        let records = self.source.consume(tp, cursor, MAX_POLL_RECORDS).await?;
        if records.is_empty() {
            return Ok(());
        }

        let flow = self.settings.name();
        let mut pending_syncs: Vec<OffsetSync> = Vec::new();
        let mut last_offset = cursor;

        for record in records {
            let downstream = self
                .target
                .produce(
                    &remote_topic,
                    tp.partition,
                    record.key.clone(),
                    record.value.clone(),
                )
                .await?;

            self.metrics
                .records_replicated
                .with_label_values(&[&flow, &tp.topic])
                .inc();
            self.metrics
                .bytes_replicated
                .with_label_values(&[&flow, &tp.topic])
                .inc_by(record.value.len() as f64);

            if self.should_sync(tp, record.offset) {
                pending_syncs.push(OffsetSync::new(tp, record.offset, downstream));
                self.last_synced.insert(tp.clone(), record.offset);
            }
            last_offset = record.offset;
        }

        self.cursors.insert(tp.clone(), last_offset + 1);

        for sync in pending_syncs {
            self.emit_sync(sync).await?;
        }
        Ok(())
    }

    /// Where to begin reading a partition seen for the first time.
    ///
    /// After a restart the sync store carries the prior correspondence and
    /// the remote log-end pins down how far mirroring actually got.
    async fn initial_cursor(&self, tp: &TopicPartition, remote_topic: &str) -> Result<i64> {
        let remote_tp = TopicPartition::new(remote_topic, tp.partition);
        let target_end = self.target.end_offset(&remote_tp).await?;
        Ok(self.store.resume_offset(tp, target_end))
    }

    /// Sparse sync discipline: a partition syncs on its first mirrored
    /// record, then whenever the drift since the last sync point exceeds
    /// `offset_lag_max`.
    fn should_sync(&self, tp: &TopicPartition, source_offset: i64) -> bool {
        match self
            .last_synced
            .get(tp)
            .copied()
            .or_else(|| self.store.latest_sync(tp).map(|s| s.source_offset))
        {
            Some(last) => source_offset - last > self.settings.offset_lag_max,
            None => true,
        }
    }

    /// Record a sync point in the store and append it to the offset-syncs
    /// topic.
    async fn emit_sync(&self, sync: OffsetSync) -> Result<()> {
        if !self.store.record_sync(sync.clone()) {
            return Ok(());
        }
        let key = serde_json::to_vec(&(&sync.topic, sync.partition))?;
        let value = serde_json::to_vec(&sync)?;
        self.syncs_client
            .produce(
                &self.settings.offset_syncs_topic(),
                0,
                Some(key.into()),
                value.into(),
            )
            .await?;
        self.metrics
            .offset_syncs_emitted
            .with_label_values(&[&self.settings.name()])
            .inc();
        debug!(
            flow = %self.settings.name(),
            partition = %sync.topic_partition(),
            source_offset = sync.source_offset,
            downstream_offset = sync.downstream_offset,
            "emitted offset sync"
        );
        Ok(())
    }

    /// Create the remote topic if needed and keep its partition count in
    /// step with the source; configuration is copied minus the excluded
    /// properties.
    async fn ensure_remote_topic(&mut self, source_topic: &str, remote_topic: &str) -> Result<()> {
        let source_partitions = self
            .source
            .partition_count(source_topic)
            .await?
            .unwrap_or(1);

        if self.ensured.get(source_topic) == Some(&source_partitions) {
            return Ok(());
        }

        match self.target.partition_count(remote_topic).await? {
            None => {
                let configs = self.mirrored_configs(source_topic).await?;
                self.target
                    .create_topic(remote_topic, source_partitions, configs)
                    .await?;
                info!(
                    flow = %self.settings.name(),
                    source_topic,
                    remote_topic,
                    partitions = source_partitions,
                    "created remote topic"
                );
            }
            Some(existing) if existing < source_partitions => {
                self.target
                    .create_partitions(remote_topic, source_partitions)
                    .await?;
                info!(
                    flow = %self.settings.name(),
                    remote_topic,
                    from = existing,
                    to = source_partitions,
                    "expanded remote topic partitions"
                );
            }
            Some(_) => {}
        }
        self.ensured
            .insert(source_topic.to_string(), source_partitions);
        Ok(())
    }

    /// Source topic configuration minus the filtered properties.
    async fn mirrored_configs(&self, source_topic: &str) -> Result<HashMap<String, String>> {
        let configs = self.source.describe_topic_config(source_topic).await?;
        Ok(configs
            .into_iter()
            .filter(|(property, _)| self.settings.config_filter.should_copy(property))
            .collect())
    }
}
