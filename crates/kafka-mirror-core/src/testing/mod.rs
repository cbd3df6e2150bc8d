//! Test utilities for integration testing.
//!
//! Provides a pair of in-memory clusters and a harness that wires a full
//! replication flow between them with intervals short enough for tests.

mod harness;
mod mock_cluster;

pub use harness::{wait_for, FlowTestHarness, SettingsBuilder};
pub use mock_cluster::MockCluster;
