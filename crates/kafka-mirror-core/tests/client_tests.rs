//! Integration tests for the read-only client facade.

use std::collections::HashMap;
use std::time::Duration;

use kafka_mirror_core::broker::{BrokerClient, TopicPartition};
use kafka_mirror_core::testing::{wait_for, FlowTestHarness};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn offsets_are_keyed_by_remote_topic_names() {
    let harness = FlowTestHarness::new();
    harness
        .primary
        .create_topic("orders", 1, HashMap::new())
        .await
        .unwrap();
    harness
        .primary
        .produce_values("orders", 0, ["a", "b"])
        .await;
    harness
        .primary
        .commit_offset("billing", TopicPartition::new("orders", 0), 2)
        .await;

    let flow = harness.start_flow(harness.settings().build()).await;
    let facade = harness.backup_facade();

    assert!(
        wait_for(WAIT, || async {
            !facade
                .remote_consumer_offsets("billing", "primary", WAIT)
                .await
                .unwrap()
                .is_empty()
        })
        .await
    );

    let offsets = facade
        .remote_consumer_offsets("billing", "primary", WAIT)
        .await
        .unwrap();
    // The key carries the rename; the source-side name never leaks through.
    assert!(offsets.contains_key(&TopicPartition::new("primary.orders", 0)));
    assert!(!offsets.contains_key(&TopicPartition::new("orders", 0)));

    flow.shutdown().await;
}

#[tokio::test]
async fn latest_checkpoint_wins() {
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
    let tp = TopicPartition::new("orders", 0);
    harness.primary.commit_offset("billing", tp.clone(), 1).await;

    let flow = harness.start_flow(harness.settings().build()).await;
    let facade = harness.backup_facade();
    let remote_tp = TopicPartition::new("primary.orders", 0);

    assert!(
        wait_for(WAIT, || async {
            facade
                .remote_consumer_offsets("billing", "primary", WAIT)
                .await
                .unwrap()
                .contains_key(&remote_tp)
        })
        .await
    );

    // The group advances; the facade must follow the newest checkpoint even
    // though the older ones remain in the topic for auditability.
    harness.primary.commit_offset("billing", tp.clone(), 3).await;
    assert!(
        wait_for(WAIT, || async {
            facade
                .remote_consumer_offsets("billing", "primary", WAIT)
                .await
                .unwrap()
                .get(&remote_tp)
                .copied()
                == Some(3)
        })
        .await
    );

    let offsets = facade
        .remote_consumer_offsets("billing", "primary", WAIT)
        .await
        .unwrap();
    assert_eq!(offsets.len(), 1);

    flow.shutdown().await;
}

#[tokio::test]
async fn groups_do_not_see_each_others_offsets() {
    let harness = FlowTestHarness::new();
    harness
        .primary
        .create_topic("orders", 1, HashMap::new())
        .await
        .unwrap();
    harness
        .primary
        .produce_values("orders", 0, ["a", "b"])
        .await;
    let tp = TopicPartition::new("orders", 0);
    harness.primary.commit_offset("billing", tp.clone(), 1).await;
    harness.primary.commit_offset("shipping", tp.clone(), 2).await;

    let flow = harness.start_flow(harness.settings().build()).await;
    let facade = harness.backup_facade();
    let remote_tp = TopicPartition::new("primary.orders", 0);

    assert!(
        wait_for(WAIT, || async {
            let billing = facade
                .remote_consumer_offsets("billing", "primary", WAIT)
                .await
                .unwrap();
            let shipping = facade
                .remote_consumer_offsets("shipping", "primary", WAIT)
                .await
                .unwrap();
            billing.get(&remote_tp).copied() == Some(1)
                && shipping.get(&remote_tp).copied() == Some(2)
        })
        .await
    );

    let nobody = facade
        .remote_consumer_offsets("nobody", "primary", WAIT)
        .await
        .unwrap();
    assert!(nobody.is_empty());

    flow.shutdown().await;
}

#[tokio::test]
async fn missing_checkpoint_topic_yields_empty_map() {
    let harness = FlowTestHarness::new();
    let facade = harness.backup_facade();
    let offsets = facade
        .remote_consumer_offsets("billing", "primary", Duration::from_millis(100))
        .await
        .unwrap();
    assert!(offsets.is_empty());
}
