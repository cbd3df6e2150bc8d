//! One replication direction, wired together.
//!
//! A [`MirrorFlow`] owns everything scoped to a single ordered
//! (source, target) cluster pair: the compiled settings, the offset sync
//! store, the shared discovery state, and the group of cooperating tasks.
//! Nothing here is shared across pairs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::broker::BrokerClient;
use crate::checkpoint::CheckpointEmitter;
use crate::config::{FlowConfig, MirrorConfig, OffsetSyncsLocation};
use crate::discovery::{DiscoveryTask, FlowState};
use crate::error::{ConfigResult, Result};
use crate::filter::{ConfigPropertyFilter, NameFilter};
use crate::heartbeat::HeartbeatEmitter;
use crate::metrics::MirrorMetrics;
use crate::policy::{ReplicationPolicy, HEARTBEATS_TOPIC};
use crate::replicator::{read_offset_syncs, TopicReplicator};
use crate::sync::OffsetSyncStore;

/// Compiled, immutable settings for one flow.
///
/// Built once from the validated configuration; every task holds an `Arc`
/// to the same instance.
pub struct FlowSettings {
    pub source_alias: String,
    pub target_alias: String,
    pub policy: ReplicationPolicy,
    pub topic_filter: NameFilter,
    pub group_filter: NameFilter,
    pub config_filter: ConfigPropertyFilter,
    pub offset_lag_max: i64,
    pub tasks_max: usize,
    pub emit_checkpoints_interval: Duration,
    pub emit_heartbeats_interval: Duration,
    pub refresh_topics_interval: Duration,
    pub refresh_groups_interval: Duration,
    pub poll_timeout: Duration,
    pub sync_group_offsets_enabled: bool,
    pub sync_group_offsets_interval: Duration,
    pub offset_syncs_location: OffsetSyncsLocation,
}

impl FlowSettings {
    /// Compile settings for `flow` out of the full configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::ConfigError`] if any pattern fails to
    /// compile. Alias and interval problems are caught earlier by
    /// [`MirrorConfig::validate`].
    pub fn compile(config: &MirrorConfig, flow: &FlowConfig) -> ConfigResult<Self> {
        Ok(Self {
            source_alias: flow.source.clone(),
            target_alias: flow.target.clone(),
            policy: ReplicationPolicy::new(
                config.replication_policy.separator.clone(),
                config.aliases(),
            ),
            topic_filter: NameFilter::topics(&flow.topics, &flow.topics_exclude)?,
            group_filter: NameFilter::groups(&flow.groups, &flow.groups_exclude)?,
            config_filter: ConfigPropertyFilter::new(&flow.config_properties_exclude)?,
            offset_lag_max: flow.offset_lag_max,
            tasks_max: flow.tasks_max,
            emit_checkpoints_interval: Duration::from_secs(flow.emit_checkpoints_interval_secs),
            emit_heartbeats_interval: Duration::from_secs(flow.emit_heartbeats_interval_secs),
            refresh_topics_interval: Duration::from_secs(flow.refresh_topics_interval_secs),
            refresh_groups_interval: Duration::from_secs(flow.refresh_groups_interval_secs),
            poll_timeout: Duration::from_millis(flow.poll_timeout_ms),
            sync_group_offsets_enabled: flow.sync_group_offsets.enabled,
            sync_group_offsets_interval: Duration::from_secs(flow.sync_group_offsets.interval_secs),
            offset_syncs_location: flow.offset_syncs_location,
        })
    }

    /// Display name, `source->target`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}->{}", self.source_alias, self.target_alias)
    }

    /// Whether a source topic belongs in this flow's assignment.
    ///
    /// Heartbeats topics bypass the user filter, since mirroring them is what
    /// builds multi-hop topology chains; loop prevention and the
    /// internal-topic rules always apply.
    #[must_use]
    pub fn should_mirror_topic(&self, topic: &str) -> bool {
        self.policy.should_replicate(topic, &self.target_alias)
            && (self.topic_filter.matches(topic) || self.policy.is_heartbeats_topic(topic))
    }

    /// Name of this flow's offset-syncs topic.
    #[must_use]
    pub fn offset_syncs_topic(&self) -> String {
        self.policy.offset_syncs_topic(&self.source_alias)
    }

    /// Name of this flow's checkpoints topic on the target cluster.
    #[must_use]
    pub fn checkpoints_topic(&self) -> String {
        self.policy.checkpoints_topic(&self.source_alias)
    }
}

/// Running flow: owns the shutdown channel and the task handles.
pub struct FlowHandle {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    /// Discovery state, readable for inspection.
    pub state: Arc<FlowState>,
    /// The flow's offset sync store, readable for inspection.
    pub sync_store: Arc<OffsetSyncStore>,
    /// The compiled settings the flow runs with.
    pub settings: Arc<FlowSettings>,
}

impl FlowHandle {
    /// Request cooperative shutdown and wait for every task to drain.
    ///
    /// Each polling loop observes the signal between poll iterations, so
    /// this completes within roughly one poll interval.
    pub async fn shutdown(self) {
        info!(flow = %self.name, "shutting down flow");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!(flow = %self.name, "flow shutdown complete");
    }
}

/// Builder/launcher for one replication direction.
pub struct MirrorFlow {
    source: Arc<dyn BrokerClient>,
    target: Arc<dyn BrokerClient>,
    settings: Arc<FlowSettings>,
    metrics: Arc<MirrorMetrics>,
}

impl MirrorFlow {
    #[must_use]
    pub fn new(
        source: Arc<dyn BrokerClient>,
        target: Arc<dyn BrokerClient>,
        settings: FlowSettings,
        metrics: Arc<MirrorMetrics>,
    ) -> Self {
        Self {
            source,
            target,
            settings: Arc::new(settings),
            metrics,
        }
    }

    /// Create internal topics, rebuild the sync store from the offset-syncs
    /// stream, run one discovery pass, and spawn the task group.
    ///
    /// # Errors
    ///
    /// Fails if the internal topics cannot be created or the initial
    /// discovery pass cannot reach the source cluster; both are startup
    /// conditions the caller should treat as fatal for this flow.
    pub async fn start(self) -> Result<FlowHandle> {
        let settings = Arc::clone(&self.settings);
        info!(flow = %settings.name(), "starting replication flow");

        let syncs_client = match settings.offset_syncs_location {
            OffsetSyncsLocation::Source => Arc::clone(&self.source),
            OffsetSyncsLocation::Target => Arc::clone(&self.target),
        };

        self.ensure_internal_topics(&syncs_client).await?;

        // Bounded-recency rebuild: the retained window of the offset-syncs
        // stream reconstructs the translation state from before a restart.
        let sync_store = Arc::new(OffsetSyncStore::new());
        let existing = read_offset_syncs(&syncs_client, &settings.offset_syncs_topic()).await?;
        sync_store.load(existing);

        let state = Arc::new(FlowState::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let discovery = DiscoveryTask::new(
            Arc::clone(&self.source),
            Arc::clone(&settings),
            Arc::clone(&state),
            shutdown_rx.clone(),
        );
        // Populate the assignment before the first replication tick so
        // already-existing topics onboard deterministically.
        discovery.refresh_once().await?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(discovery.run()));

        let heartbeat = HeartbeatEmitter::new(
            Arc::clone(&self.target),
            settings.source_alias.clone(),
            settings.target_alias.clone(),
            settings.emit_heartbeats_interval,
            Arc::clone(&self.metrics),
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(heartbeat.run()));

        let checkpoints = CheckpointEmitter::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            Arc::clone(&sync_store),
            Arc::clone(&settings),
            Arc::clone(&state),
            Arc::clone(&self.metrics),
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(checkpoints.run()));

        for slot in 0..settings.tasks_max {
            let replicator = TopicReplicator::new(
                Arc::clone(&self.source),
                Arc::clone(&self.target),
                Arc::clone(&syncs_client),
                Arc::clone(&settings),
                Arc::clone(&state),
                Arc::clone(&sync_store),
                Arc::clone(&self.metrics),
                slot,
                shutdown_rx.clone(),
            );
            tasks.push(tokio::spawn(replicator.run()));
        }

        Ok(FlowHandle {
            name: settings.name(),
            shutdown_tx,
            tasks,
            state,
            sync_store,
            settings,
        })
    }

    /// Create the heartbeats, checkpoints and offset-syncs topics if they
    /// do not exist yet.
    async fn ensure_internal_topics(&self, syncs_client: &Arc<dyn BrokerClient>) -> Result<()> {
        let settings = &self.settings;
        self.target
            .create_topic(HEARTBEATS_TOPIC, 1, Default::default())
            .await?;
        self.target
            .create_topic(&settings.checkpoints_topic(), 1, Default::default())
            .await?;
        syncs_client
            .create_topic(&settings.offset_syncs_topic(), 1, Default::default())
            .await?;
        Ok(())
    }
}
