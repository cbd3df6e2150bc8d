//! Remote topic naming policy.
//!
//! Topics mirrored from cluster `A` land on the target under
//! `"A<separator>topic"`. The rename is deterministic and reversible, which
//! is what makes offsets, checkpoints and heartbeat chains attributable to
//! their origin cluster. The same policy names the internal topics and
//! implements loop prevention for bidirectional topologies.

use crate::broker::TopicPartition;

/// Default separator between a cluster alias and the original topic name.
pub const DEFAULT_SEPARATOR: &str = ".";

/// Name of the local heartbeats topic on every cluster.
pub const HEARTBEATS_TOPIC: &str = "heartbeats";

/// Naming policy for one replication topology.
///
/// Holds the set of known cluster aliases so that parsing is unambiguous: a
/// prefix is only treated as a source alias if a cluster by that name is
/// actually part of the topology.
#[derive(Debug, Clone)]
pub struct ReplicationPolicy {
    separator: String,
    aliases: Vec<String>,
}

impl ReplicationPolicy {
    #[must_use]
    pub fn new(separator: impl Into<String>, aliases: Vec<String>) -> Self {
        Self {
            separator: separator.into(),
            aliases,
        }
    }

    /// Policy with the default `"."` separator.
    #[must_use]
    pub fn with_default_separator(aliases: Vec<String>) -> Self {
        Self::new(DEFAULT_SEPARATOR, aliases)
    }

    #[must_use]
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Remote name a topic from `source_alias` takes on the target cluster.
    ///
    /// A name that already carries the `source_alias` prefix is returned
    /// unchanged rather than re-prefixed.
    #[must_use]
    pub fn remote_topic(&self, source_alias: &str, topic: &str) -> String {
        if self.source_alias(topic) == Some(source_alias) {
            return topic.to_string();
        }
        format!("{source_alias}{}{topic}", self.separator)
    }

    /// Remote counterpart of a source partition.
    #[must_use]
    pub fn remote_topic_partition(
        &self,
        source_alias: &str,
        tp: &TopicPartition,
    ) -> TopicPartition {
        TopicPartition::new(self.remote_topic(source_alias, &tp.topic), tp.partition)
    }

    /// Source cluster alias carried by a remote topic name, if any.
    ///
    /// Only known aliases qualify; `"weather.updates"` is a local topic
    /// unless `weather` is a cluster in the topology.
    #[must_use]
    pub fn source_alias<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let (prefix, rest) = topic.split_once(&self.separator)?;
        if rest.is_empty() {
            return None;
        }
        self.aliases
            .iter()
            .any(|a| a.as_str() == prefix)
            .then_some(prefix)
    }

    /// Strip one level of alias prefix, yielding the upstream topic name.
    ///
    /// Returns the input unchanged for topics with no known alias prefix.
    #[must_use]
    pub fn upstream_topic<'a>(&self, topic: &'a str) -> &'a str {
        match self.source_alias(topic) {
            Some(alias) => &topic[alias.len() + self.separator.len()..],
            None => topic,
        }
    }

    /// Whether the topic was mirrored from some known cluster.
    #[must_use]
    pub fn is_remote(&self, topic: &str) -> bool {
        self.source_alias(topic).is_some()
    }

    /// Checkpoints topic for groups whose offsets originate on `source_alias`.
    #[must_use]
    pub fn checkpoints_topic(&self, source_alias: &str) -> String {
        format!("{source_alias}{}checkpoints.internal", self.separator)
    }

    /// Offset-syncs topic for records originating on `source_alias`.
    #[must_use]
    pub fn offset_syncs_topic(&self, source_alias: &str) -> String {
        format!("mm2-offset-syncs{sep}{source_alias}{sep}internal", sep = self.separator)
    }

    /// Heartbeats topics are `heartbeats` plus any chain of alias prefixes.
    #[must_use]
    pub fn is_heartbeats_topic(&self, topic: &str) -> bool {
        let mut name = topic;
        while let Some(alias) = self.source_alias(name) {
            name = &name[alias.len() + self.separator.len()..];
        }
        name == HEARTBEATS_TOPIC
    }

    /// Bookkeeping topics that must never be treated as user data.
    #[must_use]
    pub fn is_internal_topic(&self, topic: &str) -> bool {
        let upstream = {
            let mut name = topic;
            while let Some(alias) = self.source_alias(name) {
                name = &name[alias.len() + self.separator.len()..];
            }
            name
        };
        upstream.ends_with(".internal")
            || upstream.starts_with("mm2-offset-syncs")
            || upstream.starts_with("__")
    }

    /// Loop prevention: should this source topic be mirrored toward
    /// `target_alias`?
    ///
    /// A topic that already carries the target's alias prefix originated
    /// there; mirroring it back would bounce records between the clusters
    /// forever. Internal bookkeeping topics are never mirrored; heartbeats
    /// topics always are, which is what builds multi-hop alias chains.
    #[must_use]
    pub fn should_replicate(&self, topic: &str, target_alias: &str) -> bool {
        if self.source_alias(topic) == Some(target_alias) {
            return false;
        }
        if self.is_heartbeats_topic(topic) {
            return true;
        }
        !self.is_internal_topic(topic)
    }
}
