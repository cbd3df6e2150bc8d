//! Integration tests for record replication and topic lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use kafka_mirror_core::broker::{BrokerClient, TopicPartition};
use kafka_mirror_core::testing::{wait_for, FlowTestHarness};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn replicates_ten_partitions_of_ten_records_in_order() {
    let harness = FlowTestHarness::new();
    harness
        .primary
        .create_topic("test-topic-1", 10, HashMap::new())
        .await
        .unwrap();
    for partition in 0..10 {
        let values: Vec<String> = (0..10).map(|r| format!("p{partition}-r{r}")).collect();
        harness
            .primary
            .produce_values(
                "test-topic-1",
                partition,
                values.iter().map(String::as_str),
            )
            .await;
    }

    let flow = harness
        .start_flow(harness.settings().topics(&["test-topic-.*"]).build())
        .await;

    let mirrored = wait_for(WAIT, || async {
        let mut total = 0;
        for partition in 0..10 {
            let tp = TopicPartition::new("primary.test-topic-1", partition);
            total += harness.backup.partition_values(&tp).await.len();
        }
        total == 100
    })
    .await;
    assert!(mirrored, "expected 100 mirrored records");

    // Per-partition payload order is identical on both sides.
    for partition in 0..10 {
        let source = harness
            .primary
            .partition_values(&TopicPartition::new("test-topic-1", partition))
            .await;
        let target = harness
            .backup
            .partition_values(&TopicPartition::new("primary.test-topic-1", partition))
            .await;
        assert_eq!(source, target, "partition {partition} diverged");
    }

    flow.shutdown().await;
}

#[tokio::test]
async fn copies_topic_config_minus_excluded_properties() {
    let harness = FlowTestHarness::new();
    let mut configs = HashMap::new();
    configs.insert("retention.ms".to_string(), "86400000".to_string());
    configs.insert("cleanup.policy".to_string(), "compact".to_string());
    configs.insert("min.insync.replicas".to_string(), "2".to_string());
    configs.insert(
        "leader.replication.throttled.replicas".to_string(),
        "0:1".to_string(),
    );
    harness
        .primary
        .create_topic("orders", 1, configs)
        .await
        .unwrap();
    harness.primary.produce_values("orders", 0, ["a"]).await;

    let flow = harness
        .start_flow(harness.settings().topics(&["orders"]).build())
        .await;

    assert!(
        wait_for(WAIT, || async {
            harness.backup.has_topic("primary.orders").await
        })
        .await
    );

    let copied = harness.backup.topic_config("primary.orders").await.unwrap();
    assert_eq!(copied.get("retention.ms"), Some(&"86400000".to_string()));
    assert_eq!(copied.get("cleanup.policy"), Some(&"compact".to_string()));
    assert!(!copied.contains_key("min.insync.replicas"));
    assert!(!copied.contains_key("leader.replication.throttled.replicas"));

    flow.shutdown().await;
}

#[tokio::test]
async fn bidirectional_flows_do_not_loop() {
    let harness = FlowTestHarness::new();
    harness
        .primary
        .create_topic("orders", 1, HashMap::new())
        .await
        .unwrap();
    harness
        .primary
        .produce_values("orders", 0, ["a", "b", "c"])
        .await;

    let forward = harness.start_flow(harness.settings().build()).await;
    let reverse = harness
        .start_reverse_flow(harness.reverse_settings().build())
        .await;

    assert!(
        wait_for(WAIT, || async {
            harness
                .backup
                .partition_values(&TopicPartition::new("primary.orders", 0))
                .await
                .len()
                == 3
        })
        .await
    );

    // Heartbeats chain one level in each direction.
    assert!(
        wait_for(WAIT, || async {
            harness.backup.has_topic("primary.heartbeats").await
                && harness.primary.has_topic("backup.heartbeats").await
        })
        .await
    );

    // Give both flows a few more refresh cycles to (not) misbehave.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Nothing ever bounces back toward its origin.
    assert!(!harness.primary.has_topic("backup.primary.orders").await);
    assert!(!harness.backup.has_topic("primary.backup.heartbeats").await);
    assert!(!harness.primary.has_topic("backup.primary.heartbeats").await);

    forward.shutdown().await;
    reverse.shutdown().await;
}

#[tokio::test]
async fn onboards_topics_created_after_startup() {
    let harness = FlowTestHarness::new();
    let flow = harness.start_flow(harness.settings().build()).await;

    harness
        .primary
        .create_topic("late-topic", 1, HashMap::new())
        .await
        .unwrap();
    harness
        .primary
        .produce_values("late-topic", 0, ["x", "y"])
        .await;

    assert!(
        wait_for(WAIT, || async {
            harness
                .backup
                .partition_values(&TopicPartition::new("primary.late-topic", 0))
                .await
                .len()
                == 2
        })
        .await
    );

    flow.shutdown().await;
}

#[tokio::test]
async fn expands_remote_partitions_when_the_source_grows() {
    let harness = FlowTestHarness::new();
    harness
        .primary
        .create_topic("orders", 1, HashMap::new())
        .await
        .unwrap();
    harness.primary.produce_values("orders", 0, ["a"]).await;

    let flow = harness.start_flow(harness.settings().build()).await;
    assert!(
        wait_for(WAIT, || async {
            harness.backup.has_topic("primary.orders").await
        })
        .await
    );

    harness.primary.create_partitions("orders", 3).await.unwrap();
    harness.primary.produce_values("orders", 2, ["z"]).await;

    assert!(
        wait_for(WAIT, || async {
            harness
                .backup
                .partition_values(&TopicPartition::new("primary.orders", 2))
                .await
                .len()
                == 1
        })
        .await
    );
    assert_eq!(
        harness.backup.partition_count("primary.orders").await.unwrap(),
        Some(3)
    );

    flow.shutdown().await;
}

#[tokio::test]
async fn offset_syncs_topic_lives_where_configured() {
    use kafka_mirror_core::config::OffsetSyncsLocation;

    let harness = FlowTestHarness::new();
    harness
        .primary
        .create_topic("orders", 1, HashMap::new())
        .await
        .unwrap();

    let flow = harness
        .start_flow(
            harness
                .settings()
                .offset_syncs_location(OffsetSyncsLocation::Target)
                .build(),
        )
        .await;

    assert!(harness.backup.has_topic("mm2-offset-syncs.primary.internal").await);
    assert!(
        !harness
            .primary
            .has_topic("mm2-offset-syncs.primary.internal")
            .await
    );

    flow.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_within_a_poll_interval() {
    let harness = FlowTestHarness::new();
    harness
        .primary
        .create_topic("orders", 4, HashMap::new())
        .await
        .unwrap();
    let flow = harness.start_flow(harness.settings().build()).await;

    let started = std::time::Instant::now();
    flow.shutdown().await;
    // Poll intervals are tens of milliseconds in the harness; a second is
    // generous headroom for the cooperative drain.
    assert!(started.elapsed() < Duration::from_secs(1));
}
