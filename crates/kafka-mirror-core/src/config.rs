//! Configuration types for the cross-cluster mirror.
//!
//! Configuration is loaded from YAML, filled with defaults, and validated
//! before any task starts. The result is a single immutable [`MirrorConfig`]
//! value passed to each component at construction; nothing mutates it after
//! startup.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::filter::{ConfigPropertyFilter, NameFilter};
use crate::policy::DEFAULT_SEPARATOR;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MirrorConfig {
    /// Clusters by alias.
    pub clusters: BTreeMap<String, ClusterConfig>,

    /// Replication directions. Each ordered (source, target) pair runs as
    /// an independent flow.
    pub flows: Vec<FlowConfig>,

    /// Remote topic naming policy settings.
    #[serde(default)]
    pub replication_policy: PolicyConfig,

    /// Prometheus metrics endpoint configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for one cluster.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Bootstrap server addresses.
    pub bootstrap_servers: Vec<String>,

    /// Request timeout in milliseconds for all client operations.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// SASL credentials, when the cluster requires authentication.
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
}

/// SASL authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SaslConfig {
    /// Mechanism name as used in the SASL handshake, e.g. `PLAIN` or
    /// `SCRAM-SHA-256`.
    #[serde(default = "default_sasl_mechanism")]
    pub mechanism: String,

    /// Username; supports environment expansion: `"${KAFKA_USERNAME}"`.
    pub username: String,

    /// Password; supports environment expansion: `"${KAFKA_PASSWORD}"`.
    pub password: String,
}

impl SaslConfig {
    /// Username with environment variables expanded.
    #[must_use]
    pub fn username(&self) -> String {
        expand_env_vars(&self.username)
    }

    /// Password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }
}

/// Expand `${VAR_NAME}` references against the process environment.
///
/// Unset variables expand to the empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// One replication direction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowConfig {
    /// Source cluster alias.
    pub source: String,

    /// Target cluster alias.
    pub target: String,

    /// Whether this direction is active.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Topic allow patterns (anchored regular expressions).
    #[serde(default = "default_match_all")]
    pub topics: Vec<String>,

    /// Topic deny patterns, applied on top of the built-in excludes.
    #[serde(default)]
    pub topics_exclude: Vec<String>,

    /// Consumer-group allow patterns.
    #[serde(default = "default_match_all")]
    pub groups: Vec<String>,

    /// Consumer-group deny patterns, applied on top of the built-in
    /// excludes.
    #[serde(default)]
    pub groups_exclude: Vec<String>,

    /// Upper bound on concurrent replication tasks for this flow.
    #[serde(default = "default_tasks_max")]
    pub tasks_max: usize,

    /// Maximum drift, in records, between the mirrored position and the
    /// newest offset sync before a new sync point is emitted.
    #[serde(default = "default_offset_lag_max")]
    pub offset_lag_max: i64,

    /// Checkpoint emission interval in seconds.
    #[serde(default = "default_emit_checkpoints_interval_secs")]
    pub emit_checkpoints_interval_secs: u64,

    /// Heartbeat emission interval in seconds.
    #[serde(default = "default_emit_heartbeats_interval_secs")]
    pub emit_heartbeats_interval_secs: u64,

    /// Topic discovery refresh interval in seconds.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_topics_interval_secs: u64,

    /// Group discovery refresh interval in seconds.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_groups_interval_secs: u64,

    /// Replicator poll timeout in milliseconds; bounds how long a shutdown
    /// request can take to drain.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Direct synchronization of translated offsets into the target
    /// cluster's consumer-group state.
    #[serde(default)]
    pub sync_group_offsets: SyncGroupOffsetsConfig,

    /// Which cluster hosts the offset-syncs topic.
    #[serde(default)]
    pub offset_syncs_location: OffsetSyncsLocation,

    /// Extra topic-configuration properties to skip when copying topic
    /// configs, on top of the built-in excludes.
    #[serde(default)]
    pub config_properties_exclude: Vec<String>,
}

impl FlowConfig {
    /// Display name, `source->target`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}->{}", self.source, self.target)
    }
}

/// Settings for applying translated offsets to the target cluster's own
/// consumer-group state.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncGroupOffsetsConfig {
    /// Off by default; only safe for groups idle on the target.
    #[serde(default)]
    pub enabled: bool,

    /// Apply interval in seconds.
    #[serde(default = "default_sync_group_offsets_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncGroupOffsetsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_sync_group_offsets_interval_secs(),
        }
    }
}

/// Which cluster hosts a flow's offset-syncs topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetSyncsLocation {
    /// On the source cluster (the default).
    #[default]
    Source,
    /// On the target cluster, for setups where the source is read-only.
    Target,
}

/// Remote topic naming settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Separator between alias and topic name.
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
        }
    }
}

/// Prometheus metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_match_all() -> Vec<String> {
    vec![".*".to_string()]
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_sasl_mechanism() -> String {
    "PLAIN".to_string()
}

fn default_tasks_max() -> usize {
    4
}

fn default_offset_lag_max() -> i64 {
    100
}

fn default_emit_checkpoints_interval_secs() -> u64 {
    60
}

fn default_emit_heartbeats_interval_secs() -> u64 {
    1
}

fn default_refresh_interval_secs() -> u64 {
    600
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_sync_group_offsets_interval_secs() -> u64 {
    60
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MirrorConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// All declared cluster aliases.
    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        self.clusters.keys().cloned().collect()
    }

    /// Flows with `enabled: true`.
    #[must_use]
    pub fn enabled_flows(&self) -> Vec<&FlowConfig> {
        self.flows.iter().filter(|f| f.enabled).collect()
    }

    /// Validate the configuration. Any failure here is fatal at startup.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found: unknown or self-referential
    /// flow aliases, duplicate flows, zero intervals, malformed patterns,
    /// or an unusable policy separator.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.clusters.is_empty() {
            return Err(ConfigError::NoClusters);
        }

        let separator = &self.replication_policy.separator;
        if separator.is_empty() {
            return Err(ConfigError::InvalidSeparator {
                separator: separator.clone(),
                reason: "separator is empty".to_string(),
            });
        }
        for alias in self.clusters.keys() {
            if alias.contains(separator) {
                return Err(ConfigError::InvalidSeparator {
                    separator: separator.clone(),
                    reason: format!("cluster alias '{alias}' contains the separator"),
                });
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for flow in &self.flows {
            for alias in [&flow.source, &flow.target] {
                if !self.clusters.contains_key(alias) {
                    return Err(ConfigError::UnknownAlias {
                        source_alias: flow.source.clone(),
                        target_alias: flow.target.clone(),
                        alias: alias.clone(),
                    });
                }
            }
            if flow.source == flow.target {
                return Err(ConfigError::SelfReplication(flow.source.clone()));
            }
            if !seen.insert((flow.source.clone(), flow.target.clone())) {
                return Err(ConfigError::DuplicateFlow {
                    source_alias: flow.source.clone(),
                    target_alias: flow.target.clone(),
                });
            }

            for (name, value) in [
                ("emit_checkpoints_interval_secs", flow.emit_checkpoints_interval_secs),
                ("emit_heartbeats_interval_secs", flow.emit_heartbeats_interval_secs),
                ("refresh_topics_interval_secs", flow.refresh_topics_interval_secs),
                ("refresh_groups_interval_secs", flow.refresh_groups_interval_secs),
                ("poll_timeout_ms", flow.poll_timeout_ms),
                ("tasks_max", flow.tasks_max as u64),
            ] {
                if value == 0 {
                    return Err(ConfigError::ZeroInterval(name));
                }
            }

            // Probe-compile every pattern so malformed ones fail at startup.
            NameFilter::topics(&flow.topics, &flow.topics_exclude)?;
            NameFilter::groups(&flow.groups, &flow.groups_exclude)?;
            ConfigPropertyFilter::new(&flow.config_properties_exclude)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r"
clusters:
  primary:
    bootstrap_servers: ['localhost:9092']
  backup:
    bootstrap_servers: ['localhost:9192']
flows:
  - source: primary
    target: backup
"
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = MirrorConfig::from_str(minimal_yaml()).unwrap();
        let flow = &config.flows[0];
        assert!(flow.enabled);
        assert_eq!(flow.topics, vec![".*".to_string()]);
        assert_eq!(flow.offset_lag_max, 100);
        assert_eq!(flow.emit_heartbeats_interval_secs, 1);
        assert_eq!(flow.emit_checkpoints_interval_secs, 60);
        assert_eq!(flow.tasks_max, 4);
        assert!(!flow.sync_group_offsets.enabled);
        assert_eq!(flow.offset_syncs_location, OffsetSyncsLocation::Source);
        assert_eq!(config.replication_policy.separator, ".");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn flow_name_is_source_arrow_target() {
        let config = MirrorConfig::from_str(minimal_yaml()).unwrap();
        assert_eq!(config.flows[0].name(), "primary->backup");
    }

    #[test]
    fn unknown_alias_is_rejected() {
        let yaml = r"
clusters:
  primary:
    bootstrap_servers: ['localhost:9092']
flows:
  - source: primary
    target: dr
";
        let err = MirrorConfig::from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAlias { .. }));
    }

    #[test]
    fn self_replication_is_rejected() {
        let yaml = r"
clusters:
  primary:
    bootstrap_servers: ['localhost:9092']
flows:
  - source: primary
    target: primary
";
        let err = MirrorConfig::from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::SelfReplication(_)));
    }

    #[test]
    fn duplicate_flows_are_rejected() {
        let yaml = r"
clusters:
  primary:
    bootstrap_servers: ['localhost:9092']
  backup:
    bootstrap_servers: ['localhost:9192']
flows:
  - source: primary
    target: backup
  - source: primary
    target: backup
";
        let err = MirrorConfig::from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateFlow { .. }));
    }

    #[test]
    fn opposite_directions_are_not_duplicates() {
        let yaml = r"
clusters:
  primary:
    bootstrap_servers: ['localhost:9092']
  backup:
    bootstrap_servers: ['localhost:9192']
flows:
  - source: primary
    target: backup
  - source: backup
    target: primary
";
        assert!(MirrorConfig::from_str(yaml).is_ok());
    }

    #[test]
    fn malformed_topic_pattern_fails_fast() {
        let yaml = r"
clusters:
  primary:
    bootstrap_servers: ['localhost:9092']
  backup:
    bootstrap_servers: ['localhost:9192']
flows:
  - source: primary
    target: backup
    topics: ['[unclosed']
";
        let err = MirrorConfig::from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let yaml = r"
clusters:
  primary:
    bootstrap_servers: ['localhost:9092']
  backup:
    bootstrap_servers: ['localhost:9192']
flows:
  - source: primary
    target: backup
    emit_heartbeats_interval_secs: 0
";
        let err = MirrorConfig::from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroInterval(_)));
    }

    #[test]
    fn separator_inside_alias_is_rejected() {
        let yaml = r"
clusters:
  pri.mary:
    bootstrap_servers: ['localhost:9092']
  backup:
    bootstrap_servers: ['localhost:9192']
flows:
  - source: pri.mary
    target: backup
";
        let err = MirrorConfig::from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSeparator { .. }));
    }

    #[test]
    fn disabled_flows_are_filtered_out() {
        let yaml = r"
clusters:
  primary:
    bootstrap_servers: ['localhost:9092']
  backup:
    bootstrap_servers: ['localhost:9192']
flows:
  - source: primary
    target: backup
    enabled: false
  - source: backup
    target: primary
";
        let config = MirrorConfig::from_str(yaml).unwrap();
        let enabled = config.enabled_flows();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name(), "backup->primary");
    }

    #[test]
    fn offset_syncs_location_parses() {
        let yaml = r"
clusters:
  primary:
    bootstrap_servers: ['localhost:9092']
  backup:
    bootstrap_servers: ['localhost:9192']
flows:
  - source: primary
    target: backup
    offset_syncs_location: target
";
        let config = MirrorConfig::from_str(yaml).unwrap();
        assert_eq!(
            config.flows[0].offset_syncs_location,
            OffsetSyncsLocation::Target
        );
    }

    #[test]
    fn sasl_env_expansion() {
        std::env::set_var("MIRROR_TEST_USER", "svc-mirror");
        let sasl = SaslConfig {
            mechanism: "PLAIN".into(),
            username: "${MIRROR_TEST_USER}".into(),
            password: "literal".into(),
        };
        assert_eq!(sasl.username(), "svc-mirror");
        assert_eq!(sasl.password(), "literal");
        std::env::remove_var("MIRROR_TEST_USER");
    }
}
