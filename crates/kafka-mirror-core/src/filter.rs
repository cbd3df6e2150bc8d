//! Allow/deny pattern filters for topics, groups and topic configuration
//! properties.
//!
//! Patterns are anchored regular expressions, pre-compiled at construction
//! so a malformed pattern fails fast at startup instead of mid-refresh.

use regex::Regex;

use crate::error::{ConfigError, ConfigResult};

/// Topic name patterns excluded from mirroring regardless of the allow list.
pub const DEFAULT_TOPIC_EXCLUDES: &[&str] = &[r".*[\-\.]internal", r".*\.replica", r"__.*"];

/// Group id patterns excluded from checkpointing regardless of the allow list.
pub const DEFAULT_GROUP_EXCLUDES: &[&str] = &[r"console-consumer-.*", r"connect-.*", r"__.*"];

/// Topic configuration properties that are broker-managed or
/// throttle-related and must not be copied cluster-to-cluster.
pub const DEFAULT_CONFIG_PROPERTY_EXCLUDES: &[&str] = &[
    r"follower\.replication\.throttled\.replicas",
    r"leader\.replication\.throttled\.replicas",
    r"message\.timestamp\.difference\.max\.ms",
    r"message\.timestamp\.type",
    r"unclean\.leader\.election\.enable",
    r"min\.insync\.replicas",
];

fn compile_all(patterns: &[String]) -> ConfigResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^(?:{p})$")).map_err(|source| ConfigError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

fn matches_any(res: &[Regex], name: &str) -> bool {
    res.iter().any(|re| re.is_match(name))
}

/// Allow/deny filter over entity names.
///
/// A name passes when it matches at least one allow pattern and no deny
/// pattern. Deny always wins.
#[derive(Debug)]
pub struct NameFilter {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl NameFilter {
    /// Compile a filter from allow and deny pattern lists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for any pattern that fails to
    /// compile.
    pub fn new(allow: &[String], deny: &[String]) -> ConfigResult<Self> {
        Ok(Self {
            allow: compile_all(allow)?,
            deny: compile_all(deny)?,
        })
    }

    /// Filter for topics: user deny patterns plus the built-in excludes.
    pub fn topics(allow: &[String], deny: &[String]) -> ConfigResult<Self> {
        let mut all_deny: Vec<String> =
            DEFAULT_TOPIC_EXCLUDES.iter().map(|s| (*s).to_string()).collect();
        all_deny.extend_from_slice(deny);
        Self::new(allow, &all_deny)
    }

    /// Filter for consumer groups: user deny patterns plus built-in excludes.
    pub fn groups(allow: &[String], deny: &[String]) -> ConfigResult<Self> {
        let mut all_deny: Vec<String> =
            DEFAULT_GROUP_EXCLUDES.iter().map(|s| (*s).to_string()).collect();
        all_deny.extend_from_slice(deny);
        Self::new(allow, &all_deny)
    }

    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        matches_any(&self.allow, name) && !matches_any(&self.deny, name)
    }
}

/// Exclusion filter applied when copying topic configuration.
#[derive(Debug)]
pub struct ConfigPropertyFilter {
    exclude: Vec<Regex>,
}

impl ConfigPropertyFilter {
    /// Built-in excludes plus any user-configured patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for any pattern that fails to
    /// compile.
    pub fn new(extra_excludes: &[String]) -> ConfigResult<Self> {
        let mut patterns: Vec<String> = DEFAULT_CONFIG_PROPERTY_EXCLUDES
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        patterns.extend_from_slice(extra_excludes);
        Ok(Self {
            exclude: compile_all(&patterns)?,
        })
    }

    /// Whether this property should be copied to the target topic.
    #[must_use]
    pub fn should_copy(&self, property: &str) -> bool {
        !matches_any(&self.exclude, property)
    }
}
