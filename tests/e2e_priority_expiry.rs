// SPDX-License-Identifier: MIT OR Apache-2.0
//! Priority-first selection and expiry filtering at the sync boundary.

mod common;

use common::{TestNode, offer, pair};
use courier_model::{Priority, QueueName, now_utc};
use courier_sync::SyncMessage;

#[tokio::test(flavor = "multi_thread")]
async fn pull_returns_emergency_normal_low_in_order() {
    let a = TestNode::open().await;
    let b = TestNode::open().await;
    pair(&a, &b).await;

    // Stage out of order; selection must ignore insertion order.
    let low = a.stage(offer("low", Priority::Low)).await;
    let normal = a.stage(offer("normal", Priority::Normal)).await;
    let emergency = a.stage(offer("urgent", Priority::Emergency)).await;

    let response = a
        .node
        .sync_endpoint()
        .handle(SyncMessage::Pull { max: 3 }, &b.context())
        .await
        .unwrap();
    let bundles = match response {
        SyncMessage::PullOk { bundles } => bundles,
        other => panic!("expected pull_ok, got {}", other.kind()),
    };
    let ids: Vec<&str> = bundles.iter().map(|b| b.bundle_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            emergency.bundle_id.as_str(),
            normal.bundle_id.as_str(),
            low.bundle_id.as_str(),
        ]
    );

    // Priority rank never decreases along the returned list.
    let ranks: Vec<u8> = bundles.iter().map(|b| b.priority.rank()).collect();
    let mut sorted = ranks.clone();
    sorted.sort_unstable();
    assert_eq!(ranks, sorted);
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_bundles_are_invisible_to_peers() {
    let a = TestNode::open().await;
    let b = TestNode::open().await;
    pair(&a, &b).await;

    let fleeting = a
        .stage(
            offer("fleeting", Priority::Normal)
                .expires_at(now_utc() + chrono::Duration::milliseconds(40)),
        )
        .await;
    let durable = a.stage(offer("durable", Priority::Normal)).await;
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;

    // Not in the index...
    let response = a
        .node
        .sync_endpoint()
        .handle(
            SyncMessage::Index {
                queue: QueueName::Pending,
                up_to: 10,
            },
            &b.context(),
        )
        .await
        .unwrap();
    match response {
        SyncMessage::IndexOk { entries } => {
            let ids: Vec<&str> = entries.iter().map(|e| e.bundle_id.as_str()).collect();
            assert_eq!(ids, vec![durable.bundle_id.as_str()]);
        }
        other => panic!("expected index_ok, got {}", other.kind()),
    }

    // ...not in a pull...
    let response = a
        .node
        .sync_endpoint()
        .handle(SyncMessage::Pull { max: 10 }, &b.context())
        .await
        .unwrap();
    match response {
        SyncMessage::PullOk { bundles } => {
            assert!(bundles.iter().all(|b| b.bundle_id != fleeting.bundle_id));
        }
        other => panic!("expected pull_ok, got {}", other.kind()),
    }

    // ...and not served for an explicit request either.
    let response = a
        .node
        .sync_endpoint()
        .handle(
            SyncMessage::Request {
                bundle_ids: vec![fleeting.bundle_id.clone()],
            },
            &b.context(),
        )
        .await
        .unwrap();
    match response {
        SyncMessage::RequestOk { bundles } => assert!(bundles.is_empty()),
        other => panic!("expected request_ok, got {}", other.kind()),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn ttl_sweep_retires_expired_bundles() {
    let a = TestNode::open().await;

    let fleeting = a
        .stage(
            offer("fleeting", Priority::Normal)
                .expires_at(now_utc() + chrono::Duration::milliseconds(30)),
        )
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;

    // Drive one sweep directly instead of waiting for the background loop.
    let engine = courier_ttl::TtlEngine::new(
        a.node.store.clone(),
        std::time::Duration::from_secs(60),
        7,
        7,
    );
    let report = engine.sweep_once().await.unwrap();
    assert_eq!(report.expired.len(), 1);
    assert_eq!(
        a.node.store.queue_of(&fleeting.bundle_id).await.unwrap(),
        Some(QueueName::Expired)
    );
}
