//! Flow harness for integration testing.
//!
//! Two in-memory clusters, aliased `primary` and `backup`, plus a builder
//! for flow settings with intervals tightened to a few milliseconds so a
//! full replication round trip completes quickly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::broker::BrokerClient;
use crate::client::RemoteClusterClient;
use crate::config::OffsetSyncsLocation;
use crate::filter::{ConfigPropertyFilter, NameFilter};
use crate::flow::{FlowHandle, FlowSettings, MirrorFlow};
use crate::metrics::MirrorMetrics;
use crate::policy::ReplicationPolicy;

use super::mock_cluster::MockCluster;

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Builder for test [`FlowSettings`].
pub struct SettingsBuilder {
    source_alias: String,
    target_alias: String,
    aliases: Vec<String>,
    topics: Vec<String>,
    groups: Vec<String>,
    offset_lag_max: i64,
    tasks_max: usize,
    sync_group_offsets: bool,
    offset_syncs_location: OffsetSyncsLocation,
}

impl SettingsBuilder {
    #[must_use]
    pub fn new(source_alias: &str, target_alias: &str) -> Self {
        Self {
            source_alias: source_alias.to_string(),
            target_alias: target_alias.to_string(),
            aliases: vec![source_alias.to_string(), target_alias.to_string()],
            topics: vec![".*".to_string()],
            groups: vec![".*".to_string()],
            offset_lag_max: 0,
            tasks_max: 2,
            sync_group_offsets: false,
            offset_syncs_location: OffsetSyncsLocation::Source,
        }
    }

    #[must_use]
    pub fn topics(mut self, patterns: &[&str]) -> Self {
        self.topics = patterns.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn groups(mut self, patterns: &[&str]) -> Self {
        self.groups = patterns.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn offset_lag_max(mut self, lag: i64) -> Self {
        self.offset_lag_max = lag;
        self
    }

    #[must_use]
    pub fn tasks_max(mut self, tasks: usize) -> Self {
        self.tasks_max = tasks;
        self
    }

    #[must_use]
    pub fn sync_group_offsets(mut self, enabled: bool) -> Self {
        self.sync_group_offsets = enabled;
        self
    }

    #[must_use]
    pub fn offset_syncs_location(mut self, location: OffsetSyncsLocation) -> Self {
        self.offset_syncs_location = location;
        self
    }

    /// Build settings with every interval tightened for tests.
    #[must_use]
    pub fn build(self) -> FlowSettings {
        FlowSettings {
            source_alias: self.source_alias,
            target_alias: self.target_alias,
            policy: ReplicationPolicy::with_default_separator(self.aliases),
            topic_filter: NameFilter::topics(&self.topics, &[])
                .expect("test topic patterns are valid"),
            group_filter: NameFilter::groups(&self.groups, &[])
                .expect("test group patterns are valid"),
            config_filter: ConfigPropertyFilter::new(&[])
                .expect("built-in property patterns are valid"),
            offset_lag_max: self.offset_lag_max,
            tasks_max: self.tasks_max,
            emit_checkpoints_interval: Duration::from_millis(20),
            emit_heartbeats_interval: Duration::from_millis(20),
            refresh_topics_interval: Duration::from_millis(20),
            refresh_groups_interval: Duration::from_millis(20),
            poll_timeout: Duration::from_millis(10),
            sync_group_offsets_enabled: self.sync_group_offsets,
            sync_group_offsets_interval: Duration::from_millis(20),
            offset_syncs_location: self.offset_syncs_location,
        }
    }
}

/// Two in-memory clusters and the plumbing to run flows between them.
pub struct FlowTestHarness {
    pub primary: Arc<MockCluster>,
    pub backup: Arc<MockCluster>,
    pub metrics: Arc<MirrorMetrics>,
}

impl FlowTestHarness {
    #[must_use]
    pub fn new() -> Self {
        Self {
            primary: Arc::new(MockCluster::new("primary")),
            backup: Arc::new(MockCluster::new("backup")),
            metrics: Arc::new(MirrorMetrics::new()),
        }
    }

    /// Settings builder for the primary→backup direction.
    #[must_use]
    pub fn settings(&self) -> SettingsBuilder {
        SettingsBuilder::new("primary", "backup")
    }

    /// Settings builder for the backup→primary direction.
    #[must_use]
    pub fn reverse_settings(&self) -> SettingsBuilder {
        SettingsBuilder::new("backup", "primary")
    }

    fn client_for(&self, cluster: &Arc<MockCluster>) -> Arc<dyn BrokerClient> {
        Arc::clone(cluster) as Arc<dyn BrokerClient>
    }

    /// Start a primary→backup flow with the given settings.
    pub async fn start_flow(&self, settings: FlowSettings) -> FlowHandle {
        MirrorFlow::new(
            self.client_for(&self.primary),
            self.client_for(&self.backup),
            settings,
            Arc::clone(&self.metrics),
        )
        .start()
        .await
        .expect("flow starts against in-memory clusters")
    }

    /// Start a backup→primary flow with the given settings.
    pub async fn start_reverse_flow(&self, settings: FlowSettings) -> FlowHandle {
        MirrorFlow::new(
            self.client_for(&self.backup),
            self.client_for(&self.primary),
            settings,
            Arc::clone(&self.metrics),
        )
        .start()
        .await
        .expect("flow starts against in-memory clusters")
    }

    /// Read-only facade pointed at the backup cluster.
    #[must_use]
    pub fn backup_facade(&self) -> RemoteClusterClient {
        RemoteClusterClient::new(
            self.client_for(&self.backup),
            ReplicationPolicy::with_default_separator(vec![
                "primary".to_string(),
                "backup".to_string(),
            ]),
            "backup",
        )
    }

    /// Read-only facade pointed at the primary cluster.
    #[must_use]
    pub fn primary_facade(&self) -> RemoteClusterClient {
        RemoteClusterClient::new(
            self.client_for(&self.primary),
            ReplicationPolicy::with_default_separator(vec![
                "primary".to_string(),
                "backup".to_string(),
            ]),
            "primary",
        )
    }
}

impl Default for FlowTestHarness {
    fn default() -> Self {
        Self::new()
    }
}
