//! Consumer-group checkpoint emission.
//!
//! On every tick the emitter fetches each tracked group's committed offsets
//! from the source cluster, translates them through the flow's
//! [`OffsetSyncStore`], and publishes the results to the target cluster's
//! checkpoints topic. Two rules are absolute:
//!
//! * a pair whose translation is still unknown is skipped, not failed;
//! * the downstream offset published for a (group, partition) never
//!   regresses: when a fresh translation comes back lower (upstream log
//!   truncation, store rebuild from a shorter window), the emitter withholds
//!   the checkpoint instead.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broker::{unix_millis, BrokerClient, TopicPartition};
use crate::discovery::FlowState;
use crate::error::Result;
use crate::flow::FlowSettings;
use crate::metrics::MirrorMetrics;
use crate::sync::OffsetSyncStore;

/// A translated consumer-group offset, published to the target cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub consumer_group_id: String,
    pub topic: String,
    pub partition: i32,
    pub upstream_offset: i64,
    pub downstream_offset: i64,
    pub timestamp_ms: i64,
}

impl Checkpoint {
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        tp: &TopicPartition,
        upstream_offset: i64,
        downstream_offset: i64,
    ) -> Self {
        Self {
            consumer_group_id: group.into(),
            topic: tp.topic.clone(),
            partition: tp.partition,
            upstream_offset,
            downstream_offset,
            timestamp_ms: unix_millis(),
        }
    }

    /// The source partition this checkpoint refers to.
    #[must_use]
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// Periodic checkpoint task for one flow.
pub struct CheckpointEmitter {
    source: Arc<dyn BrokerClient>,
    target: Arc<dyn BrokerClient>,
    store: Arc<OffsetSyncStore>,
    settings: Arc<FlowSettings>,
    state: Arc<FlowState>,
    metrics: Arc<MirrorMetrics>,
    shutdown_rx: watch::Receiver<bool>,

    /// Newest downstream offset published per (group, source partition).
    /// Seeded from the checkpoints topic at startup so the monotonicity
    /// guard survives restarts.
    last_emitted: HashMap<(String, TopicPartition), i64>,
}

impl CheckpointEmitter {
    #[must_use]
    pub fn new(
        source: Arc<dyn BrokerClient>,
        target: Arc<dyn BrokerClient>,
        store: Arc<OffsetSyncStore>,
        settings: Arc<FlowSettings>,
        state: Arc<FlowState>,
        metrics: Arc<MirrorMetrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            target,
            store,
            settings,
            state,
            metrics,
            shutdown_rx,
            last_emitted: HashMap::new(),
        }
    }

    /// Run until a shutdown signal is observed.
    pub async fn run(mut self) {
        info!(
            flow = %self.settings.name(),
            interval_secs = self.settings.emit_checkpoints_interval.as_secs_f64(),
            "starting checkpoint emitter"
        );

        if let Err(e) = self.seed_from_history().await {
            warn!(flow = %self.settings.name(), error = %e, "failed to seed checkpoint history");
        }

        let mut emit_tick = tokio::time::interval(self.settings.emit_checkpoints_interval);
        let mut offsets_tick = tokio::time::interval(self.settings.sync_group_offsets_interval);

        loop {
            tokio::select! {
                _ = emit_tick.tick() => {
                    if let Err(e) = self.emit_once().await {
                        warn!(flow = %self.settings.name(), error = %e, "checkpoint emission failed");
                    }
                }
                _ = offsets_tick.tick(), if self.settings.sync_group_offsets_enabled => {
                    if let Err(e) = self.sync_group_offsets_once().await {
                        warn!(flow = %self.settings.name(), error = %e, "group offset sync failed");
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(flow = %self.settings.name(), "checkpoint emitter shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Replay the checkpoints topic so the monotonicity guard starts from
    /// what was already published.
    pub async fn seed_from_history(&mut self) -> Result<()> {
        let topic = self.settings.checkpoints_topic();
        let Some(partitions) = self.target.partition_count(&topic).await? else {
            return Ok(());
        };
        for partition in 0..partitions {
            let tp = TopicPartition::new(topic.clone(), partition);
            let end = self.target.end_offset(&tp).await?;
            let mut offset = 0;
            while offset < end {
                let records = self.target.consume(&tp, offset, 500).await?;
                if records.is_empty() {
                    break;
                }
                for record in &records {
                    if let Ok(cp) = serde_json::from_slice::<Checkpoint>(&record.value) {
                        self.last_emitted.insert(
                            (cp.consumer_group_id.clone(), cp.topic_partition()),
                            cp.downstream_offset,
                        );
                    }
                }
                offset = records.last().map_or(end, |r| r.offset + 1);
            }
        }
        debug!(
            flow = %self.settings.name(),
            pairs = self.last_emitted.len(),
            "seeded checkpoint history"
        );
        Ok(())
    }

    /// One emission pass over every tracked group. Returns the number of
    /// checkpoints published.
    pub async fn emit_once(&mut self) -> Result<usize> {
        let mut emitted = 0;
        for group in self.state.groups() {
            let committed = match self.source.committed_offsets(&group).await {
                Ok(committed) => committed,
                Err(e) => {
                    // Transient: skip this group this tick, nothing advances.
                    warn!(
                        flow = %self.settings.name(),
                        group = %group,
                        error = %e,
                        "failed to fetch committed offsets"
                    );
                    continue;
                }
            };

            for (tp, upstream_offset) in committed {
                if !self.state.contains_topic(&tp.topic) {
                    continue;
                }
                if self.checkpoint_for(&group, &tp, upstream_offset).await?.is_some() {
                    emitted += 1;
                }
            }
        }
        Ok(emitted)
    }

    /// Translate and, if the monotonicity guard allows, publish a single
    /// checkpoint. Returns the checkpoint that was published.
    async fn checkpoint_for(
        &mut self,
        group: &str,
        tp: &TopicPartition,
        upstream_offset: i64,
    ) -> Result<Option<Checkpoint>> {
        let flow = self.settings.name();
        let Some(downstream_offset) = self.store.translate(tp, upstream_offset) else {
            // Not mirrored yet: a coverage gap, resolved by a future sync.
            self.metrics
                .translation_gaps
                .with_label_values(&[&flow])
                .inc();
            debug!(
                flow = %flow,
                group = %group,
                partition = %tp,
                upstream_offset,
                "no sync point yet; skipping checkpoint"
            );
            return Ok(None);
        };

        let key = (group.to_string(), tp.clone());
        if let Some(&prev) = self.last_emitted.get(&key) {
            if downstream_offset < prev {
                self.metrics
                    .checkpoints_withheld
                    .with_label_values(&[&flow, group])
                    .inc();
                warn!(
                    flow = %flow,
                    group = %group,
                    partition = %tp,
                    downstream_offset,
                    previous = prev,
                    "translation regressed; withholding checkpoint"
                );
                return Ok(None);
            }
        }

        let checkpoint = Checkpoint::new(group, tp, upstream_offset, downstream_offset);
        let record_key = serde_json::to_vec(&(group, &tp.topic, tp.partition))?;
        let record_value = serde_json::to_vec(&checkpoint)?;
        self.target
            .produce(
                &self.settings.checkpoints_topic(),
                0,
                Some(record_key.into()),
                record_value.into(),
            )
            .await?;

        self.last_emitted.insert(key, downstream_offset);
        self.metrics
            .checkpoints_emitted
            .with_label_values(&[&flow, group])
            .inc();
        debug!(
            flow = %flow,
            group = %group,
            partition = %tp,
            upstream_offset,
            downstream_offset,
            "emitted checkpoint"
        );
        Ok(Some(checkpoint))
    }

    /// Apply the newest published checkpoints to the target cluster's own
    /// consumer-group state, for groups with no active members there.
    pub async fn sync_group_offsets_once(&self) -> Result<usize> {
        let mut applied = 0;
        for group in self.state.groups() {
            let offsets: HashMap<TopicPartition, i64> = self
                .last_emitted
                .iter()
                .filter(|((g, _), _)| g == &group)
                .map(|((_, tp), &downstream)| {
                    (
                        self.settings
                            .policy
                            .remote_topic_partition(&self.settings.source_alias, tp),
                        downstream,
                    )
                })
                .collect();
            if offsets.is_empty() {
                continue;
            }

            match self.target.group_has_active_members(&group).await {
                Ok(true) => {
                    debug!(
                        flow = %self.settings.name(),
                        group = %group,
                        "group active on target; not touching its offsets"
                    );
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(group = %group, error = %e, "group liveness check failed");
                    continue;
                }
            }

            if let Err(e) = self.target.alter_group_offsets(&group, &offsets).await {
                warn!(
                    flow = %self.settings.name(),
                    group = %group,
                    error = %e,
                    "failed to apply translated offsets"
                );
                continue;
            }
            applied += offsets.len();
            debug!(
                flow = %self.settings.name(),
                group = %group,
                partitions = offsets.len(),
                "applied translated offsets to target group"
            );
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_round_trips_through_json() {
        let tp = TopicPartition::new("orders", 2);
        let cp = Checkpoint::new("billing", &tp, 100, 40);
        let bytes = serde_json::to_vec(&cp).unwrap();
        let back: Checkpoint = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, cp);
        assert_eq!(back.topic_partition(), tp);
    }

    #[test]
    fn checkpoint_carries_a_timestamp() {
        let tp = TopicPartition::new("orders", 0);
        let cp = Checkpoint::new("billing", &tp, 10, 10);
        assert!(cp.timestamp_ms > 0);
    }
}
