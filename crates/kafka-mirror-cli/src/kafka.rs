//! rdkafka-backed implementation of the broker capability surface.
//!
//! One instance per cluster alias. Producer and admin calls are natively
//! async; consumer-side operations go through short-lived `BaseConsumer`s on
//! the blocking pool, which keeps every call bounded by the configured
//! request timeout and leaves no long-lived consumer state to rebalance.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::admin::{
    AdminClient, AdminOptions, AlterConfig, ConfigResource, NewPartitions, NewTopic,
    OwnedResourceSpecifier, ResourceSpecifier, TopicReplication,
};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::debug;

use kafka_mirror_core::broker::{BrokerClient, ConsumedRecord, TopicMetadata, TopicPartition};
use kafka_mirror_core::config::ClusterConfig;
use kafka_mirror_core::error::{MirrorError, Result};

/// Broker client for one real cluster.
pub struct KafkaBrokerClient {
    alias: String,
    base_config: ClientConfig,
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    timeout: Duration,
    /// Replication factor used when creating topics on this cluster.
    replication_factor: i32,
}

impl KafkaBrokerClient {
    /// Build a client from the cluster's configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying producer or admin client cannot
    /// be constructed.
    pub fn new(alias: &str, config: &ClusterConfig) -> Result<Self> {
        let mut base_config = ClientConfig::new();
        base_config.set("bootstrap.servers", config.bootstrap_servers.join(","));
        if let Some(sasl) = &config.sasl {
            base_config
                .set("security.protocol", "sasl_ssl")
                .set("sasl.mechanism", sasl.mechanism.clone())
                .set("sasl.username", sasl.username())
                .set("sasl.password", sasl.password());
        }

        let producer: FutureProducer = base_config
            .clone()
            .set("message.timeout.ms", config.request_timeout_ms.to_string())
            .create()
            .map_err(|e| Self::broker_error_for(alias, &e))?;
        let admin: AdminClient<DefaultClientContext> = base_config
            .clone()
            .create()
            .map_err(|e| Self::broker_error_for(alias, &e))?;

        Ok(Self {
            alias: alias.to_string(),
            base_config,
            producer,
            admin,
            timeout: Duration::from_millis(config.request_timeout_ms),
            replication_factor: 3,
        })
    }

    /// Override the replication factor used for created topics.
    #[must_use]
    pub fn with_replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    fn broker_error_for(alias: &str, error: &dyn std::fmt::Display) -> MirrorError {
        MirrorError::Broker {
            cluster: alias.to_string(),
            message: error.to_string(),
        }
    }

    fn broker_error(&self, error: &dyn std::fmt::Display) -> MirrorError {
        Self::broker_error_for(&self.alias, error)
    }

    /// A throwaway consumer, optionally bound to a group id.
    fn consumer(&self, group: Option<&str>) -> Result<BaseConsumer> {
        let mut config = self.base_config.clone();
        config
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest");
        if let Some(group) = group {
            config.set("group.id", group);
        } else {
            config.set("group.id", format!("{}-mirror-probe", self.alias));
        }
        config.create().map_err(|e| self.broker_error(&e))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| MirrorError::Broker {
                cluster: self.alias.clone(),
                message: format!("blocking task failed: {e}"),
            })?
    }
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    async fn list_topics(&self) -> Result<Vec<TopicMetadata>> {
        let consumer = self.consumer(None)?;
        let timeout = self.timeout;
        let alias = self.alias.clone();
        self.blocking(move || {
            let metadata = consumer
                .fetch_metadata(None, timeout)
                .map_err(|e| Self::broker_error_for(&alias, &e))?;
            Ok(metadata
                .topics()
                .iter()
                .map(|t| TopicMetadata {
                    name: t.name().to_string(),
                    partitions: t.partitions().len() as i32,
                })
                .collect())
        })
        .await
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        configs: HashMap<String, String>,
    ) -> Result<()> {
        let config_refs: Vec<(&str, &str)> = configs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let topic = NewTopic::new(
            name,
            partitions,
            TopicReplication::Fixed(self.replication_factor),
        );
        let topic = config_refs
            .into_iter()
            .fold(topic, |t, (k, v)| t.set(k, v));

        let results = self
            .admin
            .create_topics([&topic], &AdminOptions::new().operation_timeout(Some(self.timeout.into())))
            .await
            .map_err(|e| self.broker_error(&e))?;
        for result in results {
            match result {
                Ok(_) => {}
                Err((_, rdkafka::types::RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(cluster = %self.alias, topic = name, "topic already exists");
                }
                Err((topic, code)) => {
                    return Err(MirrorError::Broker {
                        cluster: self.alias.clone(),
                        message: format!("create topic '{topic}' failed: {code}"),
                    });
                }
            }
        }
        Ok(())
    }

    async fn partition_count(&self, topic: &str) -> Result<Option<i32>> {
        let consumer = self.consumer(None)?;
        let timeout = self.timeout;
        let alias = self.alias.clone();
        let topic = topic.to_string();
        self.blocking(move || {
            let metadata = consumer
                .fetch_metadata(Some(&topic), timeout)
                .map_err(|e| Self::broker_error_for(&alias, &e))?;
            Ok(metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic && t.error().is_none() && !t.partitions().is_empty())
                .map(|t| t.partitions().len() as i32))
        })
        .await
    }

    async fn create_partitions(&self, topic: &str, total: i32) -> Result<()> {
        let request = NewPartitions::new(topic, total as usize);
        let results = self
            .admin
            .create_partitions([&request], &AdminOptions::new())
            .await
            .map_err(|e| self.broker_error(&e))?;
        for result in results {
            if let Err((topic, code)) = result {
                return Err(MirrorError::Broker {
                    cluster: self.alias.clone(),
                    message: format!("create partitions on '{topic}' failed: {code}"),
                });
            }
        }
        Ok(())
    }

    async fn describe_topic_config(&self, topic: &str) -> Result<HashMap<String, String>> {
        let results = self
            .admin
            .describe_configs([&ResourceSpecifier::Topic(topic)], &AdminOptions::new())
            .await
            .map_err(|e| self.broker_error(&e))?;

        let mut configs = HashMap::new();
        for result in results {
            let resource: ConfigResource = result.map_err(|e| self.broker_error(&e))?;
            if !matches!(resource.specifier, OwnedResourceSpecifier::Topic(_)) {
                continue;
            }
            for entry in resource.entries {
                // Only explicitly-set values travel to the other cluster.
                if entry.is_default {
                    continue;
                }
                if let Some(value) = entry.value {
                    configs.insert(entry.name, value);
                }
            }
        }
        Ok(configs)
    }

    async fn alter_topic_config(
        &self,
        topic: &str,
        configs: HashMap<String, String>,
    ) -> Result<()> {
        let mut alter = AlterConfig::new(ResourceSpecifier::Topic(topic));
        for (key, value) in &configs {
            alter = alter.set(key, value);
        }
        let results = self
            .admin
            .alter_configs([&alter], &AdminOptions::new())
            .await
            .map_err(|e| self.broker_error(&e))?;
        for result in results {
            if let Err((_, code)) = result {
                return Err(MirrorError::Broker {
                    cluster: self.alias.clone(),
                    message: format!("alter config on '{topic}' failed: {code}"),
                });
            }
        }
        Ok(())
    }

    async fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<i64> {
        let mut record = FutureRecord::to(topic).partition(partition).payload(&value[..]);
        if let Some(key) = &key {
            record = record.key(&key[..]);
        }
        let (_, offset) = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| self.broker_error(&e))?;
        Ok(offset)
    }

    async fn consume(
        &self,
        tp: &TopicPartition,
        from_offset: i64,
        max_records: usize,
    ) -> Result<Vec<ConsumedRecord>> {
        use rdkafka::message::Message;

        let consumer = self.consumer(None)?;
        let alias = self.alias.clone();
        let tp = tp.clone();
        let timeout = self.timeout;
        self.blocking(move || {
            let mut assignment = TopicPartitionList::new();
            assignment
                .add_partition_offset(&tp.topic, tp.partition, Offset::Offset(from_offset))
                .map_err(|e| Self::broker_error_for(&alias, &e))?;
            consumer
                .assign(&assignment)
                .map_err(|e| Self::broker_error_for(&alias, &e))?;

            let deadline = std::time::Instant::now() + timeout;
            let mut records = Vec::new();
            while records.len() < max_records {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match consumer.poll(remaining.min(Duration::from_millis(200))) {
                    Some(Ok(message)) => {
                        records.push(ConsumedRecord {
                            offset: message.offset(),
                            key: message.key().map(Bytes::copy_from_slice),
                            value: message
                                .payload()
                                .map(Bytes::copy_from_slice)
                                .unwrap_or_default(),
                        });
                    }
                    Some(Err(e)) => return Err(Self::broker_error_for(&alias, &e)),
                    // No more records buffered within the poll window.
                    None => break,
                }
            }
            Ok(records)
        })
        .await
    }

    async fn end_offset(&self, tp: &TopicPartition) -> Result<i64> {
        let consumer = self.consumer(None)?;
        let alias = self.alias.clone();
        let tp = tp.clone();
        let timeout = self.timeout;
        self.blocking(move || {
            let (_, high) = consumer
                .fetch_watermarks(&tp.topic, tp.partition, timeout)
                .map_err(|e| Self::broker_error_for(&alias, &e))?;
            Ok(high)
        })
        .await
    }

    async fn list_groups(&self) -> Result<Vec<String>> {
        let consumer = self.consumer(None)?;
        let alias = self.alias.clone();
        let timeout = self.timeout;
        self.blocking(move || {
            let groups = consumer
                .fetch_group_list(None, timeout)
                .map_err(|e| Self::broker_error_for(&alias, &e))?;
            Ok(groups
                .groups()
                .iter()
                .map(|g| g.name().to_string())
                .collect())
        })
        .await
    }

    async fn committed_offsets(&self, group: &str) -> Result<HashMap<TopicPartition, i64>> {
        let consumer = self.consumer(Some(group))?;
        let alias = self.alias.clone();
        let timeout = self.timeout;
        self.blocking(move || {
            // The committed-offsets query needs an explicit partition list;
            // ask for every partition of every topic and keep the ones the
            // group has actually committed.
            let metadata = consumer
                .fetch_metadata(None, timeout)
                .map_err(|e| Self::broker_error_for(&alias, &e))?;
            let mut wanted = TopicPartitionList::new();
            for topic in metadata.topics() {
                for partition in topic.partitions() {
                    wanted.add_partition(topic.name(), partition.id());
                }
            }

            let committed = consumer
                .committed_offsets(wanted, timeout)
                .map_err(|e| Self::broker_error_for(&alias, &e))?;
            let mut offsets = HashMap::new();
            for element in committed.elements() {
                if let Offset::Offset(offset) = element.offset() {
                    if offset >= 0 {
                        offsets.insert(
                            TopicPartition::new(element.topic(), element.partition()),
                            offset,
                        );
                    }
                }
            }
            Ok(offsets)
        })
        .await
    }

    async fn alter_group_offsets(
        &self,
        group: &str,
        offsets: &HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        use rdkafka::consumer::CommitMode;

        let consumer = self.consumer(Some(group))?;
        let alias = self.alias.clone();
        let offsets = offsets.clone();
        self.blocking(move || {
            let mut list = TopicPartitionList::new();
            for (tp, offset) in &offsets {
                list.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*offset))
                    .map_err(|e| Self::broker_error_for(&alias, &e))?;
            }
            consumer
                .commit(&list, CommitMode::Sync)
                .map_err(|e| Self::broker_error_for(&alias, &e))
        })
        .await
    }

    async fn group_has_active_members(&self, group: &str) -> Result<bool> {
        let consumer = self.consumer(None)?;
        let alias = self.alias.clone();
        let group = group.to_string();
        let timeout = self.timeout;
        self.blocking(move || {
            let groups = consumer
                .fetch_group_list(Some(&group), timeout)
                .map_err(|e| Self::broker_error_for(&alias, &e))?;
            Ok(groups
                .groups()
                .iter()
                .any(|g| g.name() == group && !g.members().is_empty()))
        })
        .await
    }
}
