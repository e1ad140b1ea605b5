// SPDX-License-Identifier: MIT OR Apache-2.0
//! Create → forward → receipt round trip between two nodes.

mod common;

use common::{TestNode, offer, pair, sync};
use courier_model::{Priority, QueueName, ReceiptPolicy};

#[tokio::test(flavor = "multi_thread")]
async fn receipt_flows_back_to_the_author() {
    let a = TestNode::open().await;
    let b = TestNode::open().await;
    pair(&a, &b).await;

    // A authors with receipts requested and stages for forwarding.
    let bundle = a
        .stage(offer("tomatoes to share", Priority::Normal).receipt_policy(ReceiptPolicy::Requested))
        .await;

    // Round 1: A pushes to B; B stores and authors a `received` receipt.
    let report = sync(&a, &b).await;
    assert_eq!(report.push_accepted, 1);
    assert_eq!(
        b.node.store.queue_of(&bundle.bundle_id).await.unwrap(),
        Some(QueueName::Inbox)
    );
    assert_eq!(b.node.store.count(QueueName::Outbox).await.unwrap(), 1);

    // B stages its outbox (the receipt) and initiates the return round.
    b.stage_outbox().await;
    let report = sync(&b, &a).await;
    assert_eq!(report.push_accepted, 1);

    // A has observed the receipt.
    let status = a
        .node
        .receipts
        .delivery_status(&bundle.bundle_id)
        .await
        .unwrap();
    assert!(status.received, "status: {status:?}");
    assert_eq!(status.receipt_count, 1);
    assert_eq!(status.timeline[0].reporter, b.node.keys.fingerprint());
}

#[tokio::test(flavor = "multi_thread")]
async fn round_trip_does_not_alter_signed_content() {
    let a = TestNode::open().await;
    let b = TestNode::open().await;
    pair(&a, &b).await;

    let bundle = a.stage(offer("boomerang", Priority::Normal)).await;
    let original_canonical = bundle.canonical_json().unwrap();

    // A → B, then B stages everything and pushes back A's own bundle.
    sync(&a, &b).await;
    b.node
        .store
        .move_bundle(&bundle.bundle_id, QueueName::Inbox, QueueName::Pending)
        .await
        .unwrap();
    sync(&b, &a).await;

    // A's copy is unchanged in every signed field; the duplicate receive
    // was rejected or absorbed as the reappearance move, never rewritten.
    let ours = a.node.store.get(&bundle.bundle_id).await.unwrap().unwrap();
    assert_eq!(ours.canonical_json().unwrap(), original_canonical);
    assert_eq!(ours.signature, bundle.signature);
    assert_eq!(ours.bundle_id, bundle.bundle_id);
}

#[tokio::test(flavor = "multi_thread")]
async fn delivered_receipt_moves_the_original_out_of_pending() {
    let a = TestNode::open().await;
    let b = TestNode::open().await;
    pair(&a, &b).await;

    let bundle = a
        .stage(offer("package", Priority::Normal).receipt_policy(ReceiptPolicy::Required))
        .await;
    sync(&a, &b).await;

    // B reports delivery (it is the destination in this two-node world).
    let received_copy = b.node.store.get(&bundle.bundle_id).await.unwrap().unwrap();
    b.node
        .receipts
        .emit(
            &received_copy,
            courier_receipt::ReceiptType::Delivered,
            None,
        )
        .await
        .unwrap()
        .expect("required policy emits");
    b.stage_outbox().await;
    sync(&b, &a).await;

    // A both records the status and retires its own copy.
    let status = a
        .node
        .receipts
        .delivery_status(&bundle.bundle_id)
        .await
        .unwrap();
    assert!(status.delivered);
    assert_eq!(
        a.node.store.queue_of(&bundle.bundle_id).await.unwrap(),
        Some(QueueName::Delivered)
    );
}
