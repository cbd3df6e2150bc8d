//! Domain error types for the cross-cluster mirror.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use thiserror::Error;

/// Errors related to configuration parsing and validation.
///
/// All of these are fatal at startup; none are retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A replication flow references a cluster alias that is not declared.
    #[error("flow '{source_alias}->{target_alias}' references unknown cluster alias '{alias}'")]
    UnknownAlias {
        source_alias: String,
        target_alias: String,
        alias: String,
    },

    /// A replication flow names the same cluster as source and target.
    #[error("flow source and target are the same cluster: '{0}'")]
    SelfReplication(String),

    /// The same ordered (source, target) pair appears more than once.
    #[error("duplicate replication flow '{source_alias}->{target_alias}'")]
    DuplicateFlow {
        source_alias: String,
        target_alias: String,
    },

    /// A topic/group/property pattern failed to compile.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// An interval knob was set to zero.
    #[error("interval '{0}' must be greater than zero")]
    ZeroInterval(&'static str),

    /// No cluster was declared under the given alias section.
    #[error("no clusters declared in configuration")]
    NoClusters,

    /// The replication policy separator is empty or appears in an alias.
    #[error("invalid replication policy separator '{separator}': {reason}")]
    InvalidSeparator { separator: String, reason: String },
}

/// Errors that occur while a replication flow is running.
///
/// Everything here is treated as transient by the polling tasks: the
/// operation is retried with backoff on the next tick and no cursor or
/// checkpoint is advanced for the affected pair in between.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Broker connection or request failure.
    #[error("broker error on cluster '{cluster}': {message}")]
    Broker { cluster: String, message: String },

    /// An operation did not complete within its bounded wait.
    #[error("timed out after {millis}ms while {operation}")]
    Timeout { operation: String, millis: u64 },

    /// Topic was not found on the cluster.
    #[error("topic not found: {topic}")]
    TopicNotFound { topic: String },

    /// Partition index out of range for a topic.
    #[error("partition {partition} out of range for topic {topic}")]
    PartitionOutOfRange { topic: String, partition: i32 },

    /// Consumer group was not found on the cluster.
    #[error("consumer group not found: {group}")]
    GroupNotFound { group: String },

    /// An internal-topic record failed to encode or decode.
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Shutdown was requested while the operation was in flight.
    #[error("mirror shutting down")]
    Shutdown,
}

/// Result type alias for runtime mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
