//! Cross-cluster replication of a publish/subscribe message log.
//!
//! Topics and their records are mirrored between independently-operated
//! clusters, topic configuration is selectively copied, and consumer-group
//! offsets committed on one cluster are translated into equivalent offsets
//! on the other, so a group can fail over or fail back without re-reading or
//! skipping data beyond a bounded margin.
//!
//! # Architecture
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`policy`] - Remote topic naming and loop prevention
//! - [`filter`] - Allow/deny filters for topics, groups and config properties
//! - [`broker`] - The produce/consume/admin capability surface
//! - [`sync`] - Offset sync points and the translation store
//! - [`replicator`] - Record replication and topic config sync
//! - [`checkpoint`] - Consumer-group checkpoint emission
//! - [`heartbeat`] - Heartbeats and the replication topology graph
//! - [`discovery`] - Periodic topic/group discovery
//! - [`flow`] - One replication direction, wired together
//! - [`client`] - Read-only query facade for failover tooling
//! - [`metrics`] - Prometheus metrics collection
//!
//! Each ordered (source, target) cluster pair runs as an independent
//! [`flow::MirrorFlow`]: a group of cooperating polling tasks sharing one
//! [`sync::OffsetSyncStore`] and one discovery state, cancelled
//! cooperatively through a watch channel.

#![forbid(unsafe_code)]

pub mod broker;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod flow;
pub mod heartbeat;
pub mod metrics;
pub mod policy;
pub mod replicator;
pub mod sync;

/// Test utilities: the in-memory cluster pair and flow harness.
///
/// Only available when compiling tests or with the `testing` feature.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use broker::{BrokerClient, ConsumedRecord, TopicMetadata, TopicPartition};
pub use checkpoint::Checkpoint;
pub use client::RemoteClusterClient;
pub use config::MirrorConfig;
pub use error::{ConfigError, MirrorError, Result};
pub use flow::{FlowHandle, FlowSettings, MirrorFlow};
pub use heartbeat::{Heartbeat, TopologyGraph};
pub use policy::ReplicationPolicy;
pub use sync::{OffsetSync, OffsetSyncStore};
