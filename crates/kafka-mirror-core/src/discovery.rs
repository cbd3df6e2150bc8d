//! Periodic discovery of topics and groups to mirror.
//!
//! On each refresh the live metadata of the source cluster is re-matched
//! against the flow's allow/deny patterns and diffed against the current
//! assignment as an explicit snapshot diff. Newly matching entities are
//! onboarded; entities that stopped matching become removal candidates and
//! are only logged; transient metadata blips must not tear replication
//! state down.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broker::BrokerClient;
use crate::error::Result;
use crate::flow::FlowSettings;

/// Added/removed sets produced by one snapshot diff.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl SnapshotDiff {
    /// Diff a current assignment against a freshly observed snapshot.
    #[must_use]
    pub fn between(current: &BTreeSet<String>, observed: &BTreeSet<String>) -> Self {
        Self {
            added: observed.difference(current).cloned().collect(),
            removed: current.difference(observed).cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Shared assignment of one flow: which topics and groups are mirrored.
///
/// Written by the discovery task, read by the replicator and checkpoint
/// tasks. Removal candidates accumulate separately and never shrink the
/// assignment (soft removal).
#[derive(Debug, Default)]
pub struct FlowState {
    topics: RwLock<BTreeSet<String>>,
    groups: RwLock<BTreeSet<String>>,
    topic_removal_candidates: RwLock<BTreeSet<String>>,
    group_removal_candidates: RwLock<BTreeSet<String>>,
}

impl FlowState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn topics(&self) -> BTreeSet<String> {
        self.topics.read().expect("lock poisoned").clone()
    }

    #[must_use]
    pub fn groups(&self) -> BTreeSet<String> {
        self.groups.read().expect("lock poisoned").clone()
    }

    #[must_use]
    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics.read().expect("lock poisoned").contains(topic)
    }

    #[must_use]
    pub fn topic_removal_candidates(&self) -> BTreeSet<String> {
        self.topic_removal_candidates
            .read()
            .expect("lock poisoned")
            .clone()
    }

    #[must_use]
    pub fn group_removal_candidates(&self) -> BTreeSet<String> {
        self.group_removal_candidates
            .read()
            .expect("lock poisoned")
            .clone()
    }

    /// Apply a topic diff: additions extend the assignment, removals only
    /// mark candidates. Re-appearing topics are cleared from the candidate
    /// set.
    pub fn apply_topic_diff(&self, diff: &SnapshotDiff) {
        let mut topics = self.topics.write().expect("lock poisoned");
        let mut candidates = self.topic_removal_candidates.write().expect("lock poisoned");
        for added in &diff.added {
            topics.insert(added.clone());
            candidates.remove(added);
        }
        for removed in &diff.removed {
            candidates.insert(removed.clone());
        }
    }

    /// Group counterpart of [`FlowState::apply_topic_diff`].
    pub fn apply_group_diff(&self, diff: &SnapshotDiff) {
        let mut groups = self.groups.write().expect("lock poisoned");
        let mut candidates = self.group_removal_candidates.write().expect("lock poisoned");
        for added in &diff.added {
            groups.insert(added.clone());
            candidates.remove(added);
        }
        for removed in &diff.removed {
            candidates.insert(removed.clone());
        }
    }
}

/// Periodic discovery task for one flow.
pub struct DiscoveryTask {
    source: Arc<dyn BrokerClient>,
    settings: Arc<FlowSettings>,
    state: Arc<FlowState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DiscoveryTask {
    #[must_use]
    pub fn new(
        source: Arc<dyn BrokerClient>,
        settings: Arc<FlowSettings>,
        state: Arc<FlowState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            settings,
            state,
            shutdown_rx,
        }
    }

    /// Run until a shutdown signal is observed.
    pub async fn run(mut self) {
        info!(
            flow = %self.settings.name(),
            topics_interval_secs = self.settings.refresh_topics_interval.as_secs_f64(),
            groups_interval_secs = self.settings.refresh_groups_interval.as_secs_f64(),
            "starting discovery"
        );

        let mut topics_tick = tokio::time::interval(self.settings.refresh_topics_interval);
        let mut groups_tick = tokio::time::interval(self.settings.refresh_groups_interval);

        loop {
            tokio::select! {
                _ = topics_tick.tick() => {
                    if let Err(e) = self.refresh_topics().await {
                        warn!(flow = %self.settings.name(), error = %e, "topic refresh failed");
                    }
                }
                _ = groups_tick.tick() => {
                    if let Err(e) = self.refresh_groups().await {
                        warn!(flow = %self.settings.name(), error = %e, "group refresh failed");
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(flow = %self.settings.name(), "discovery shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One combined refresh; used at flow startup so the initial assignment
    /// exists before the first replication tick.
    pub async fn refresh_once(&self) -> Result<()> {
        self.refresh_topics().await?;
        self.refresh_groups().await?;
        Ok(())
    }

    /// Re-match source topics against the filter and fold the diff into the
    /// assignment.
    pub async fn refresh_topics(&self) -> Result<()> {
        let observed: BTreeSet<String> = self
            .source
            .list_topics()
            .await?
            .into_iter()
            .map(|t| t.name)
            .filter(|name| self.settings.should_mirror_topic(name))
            .collect();

        let diff = SnapshotDiff::between(&self.state.topics(), &observed);
        if diff.is_empty() {
            debug!(flow = %self.settings.name(), topics = observed.len(), "topic refresh unchanged");
            return Ok(());
        }

        if !diff.added.is_empty() {
            info!(
                flow = %self.settings.name(),
                added = ?diff.added,
                "onboarding topics"
            );
        }
        for candidate in &diff.removed {
            warn!(
                flow = %self.settings.name(),
                topic = %candidate,
                "topic no longer matches; flagged for removal, keeping state"
            );
        }
        self.state.apply_topic_diff(&diff);
        Ok(())
    }

    /// Re-match source consumer groups against the filter and fold the diff
    /// into the assignment.
    pub async fn refresh_groups(&self) -> Result<()> {
        let observed: BTreeSet<String> = self
            .source
            .list_groups()
            .await?
            .into_iter()
            .filter(|g| self.settings.group_filter.matches(g))
            .collect();

        let diff = SnapshotDiff::between(&self.state.groups(), &observed);
        if diff.is_empty() {
            return Ok(());
        }

        if !diff.added.is_empty() {
            info!(
                flow = %self.settings.name(),
                added = ?diff.added,
                "onboarding consumer groups"
            );
        }
        for candidate in &diff.removed {
            warn!(
                flow = %self.settings.name(),
                group = %candidate,
                "group no longer matches; flagged for removal, keeping state"
            );
        }
        self.state.apply_group_diff(&diff);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn diff_splits_added_and_removed() {
        let diff = SnapshotDiff::between(&set(&["a", "b"]), &set(&["b", "c"]));
        assert_eq!(diff.added, set(&["c"]));
        assert_eq!(diff.removed, set(&["a"]));
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let diff = SnapshotDiff::between(&set(&["a"]), &set(&["a"]));
        assert!(diff.is_empty());
    }

    #[test]
    fn removals_are_soft() {
        let state = FlowState::new();
        state.apply_topic_diff(&SnapshotDiff::between(&set(&[]), &set(&["orders", "payments"])));
        assert_eq!(state.topics(), set(&["orders", "payments"]));

        // payments disappears from the snapshot; assignment is untouched,
        // only the candidate set grows.
        state.apply_topic_diff(&SnapshotDiff::between(&state.topics(), &set(&["orders"])));
        assert_eq!(state.topics(), set(&["orders", "payments"]));
        assert_eq!(state.topic_removal_candidates(), set(&["payments"]));
    }

    #[test]
    fn reappearing_topic_clears_its_candidacy() {
        let state = FlowState::new();
        state.apply_topic_diff(&SnapshotDiff::between(&set(&[]), &set(&["orders"])));
        state.apply_topic_diff(&SnapshotDiff::between(&state.topics(), &set(&[])));
        assert_eq!(state.topic_removal_candidates(), set(&["orders"]));

        // The topic shows up again on the next refresh: since it never left
        // the assignment there is nothing to add, but a fresh observation
        // containing it produces no removal either.
        let diff = SnapshotDiff::between(&state.topics(), &set(&["orders"]));
        assert!(diff.is_empty());

        // An explicit re-add (e.g. after manual state surgery) clears it.
        state.apply_topic_diff(&SnapshotDiff {
            added: set(&["orders"]),
            removed: BTreeSet::new(),
        });
        assert!(state.topic_removal_candidates().is_empty());
    }

    #[test]
    fn group_state_tracks_candidates_independently() {
        let state = FlowState::new();
        state.apply_group_diff(&SnapshotDiff::between(&set(&[]), &set(&["billing"])));
        state.apply_topic_diff(&SnapshotDiff::between(&set(&[]), &set(&["orders"])));
        state.apply_group_diff(&SnapshotDiff::between(&state.groups(), &set(&[])));

        assert_eq!(state.group_removal_candidates(), set(&["billing"]));
        assert!(state.topic_removal_candidates().is_empty());
        assert_eq!(state.groups(), set(&["billing"]));
    }
}
