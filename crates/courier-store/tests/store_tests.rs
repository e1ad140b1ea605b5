// SPDX-License-Identifier: MIT OR Apache-2.0
//! Queue store behavior: conditional insert, conditional moves, ordering,
//! scans, and size accounting.

use chrono::Duration;
use courier_model::{Audience, Bundle, Priority, QueueName, ReceiptPolicy, now_utc};
use courier_store::QueueStore;
use serde_json::{Map, Value};

fn bundle(tag: &str, priority: Priority) -> Bundle {
    bundle_with_age(tag, priority, 0)
}

/// `age_secs` pushes `created_at` into the past so ordering is deterministic.
fn bundle_with_age(tag: &str, priority: Priority, age_secs: i64) -> Bundle {
    let created = now_utc() - Duration::seconds(age_secs);
    let mut payload = Map::new();
    payload.insert("tag".into(), Value::String(tag.into()));
    let mut b = Bundle {
        audience: Audience::Public,
        author_public_key: "test-key".into(),
        bundle_id: String::new(),
        created_at: created,
        expires_at: created + Duration::hours(1),
        hop_count: 0,
        hop_limit: 10,
        payload,
        payload_type: "test:item".into(),
        priority,
        receipt_policy: ReceiptPolicy::None,
        signature: "dGVzdA==".into(),
        tags: vec![],
        topic: "coordination".into(),
    };
    b.bundle_id = b.calculate_bundle_id().unwrap();
    b
}

#[tokio::test]
async fn enqueue_is_conditional_on_bundle_id() {
    let store = QueueStore::open_in_memory().unwrap();
    let b = bundle("a", Priority::Normal);

    assert!(store.enqueue(QueueName::Inbox, &b).await.unwrap());
    // Same id again, even into a different queue: no-op, no overwrite.
    assert!(!store.enqueue(QueueName::Outbox, &b).await.unwrap());
    assert_eq!(store.queue_of(&b.bundle_id).await.unwrap(), Some(QueueName::Inbox));
    assert_eq!(store.count(QueueName::Inbox).await.unwrap(), 1);
    assert_eq!(store.count(QueueName::Outbox).await.unwrap(), 0);
}

#[tokio::test]
async fn move_is_conditional_on_current_queue() {
    let store = QueueStore::open_in_memory().unwrap();
    let b = bundle("a", Priority::Normal);
    store.enqueue(QueueName::Outbox, &b).await.unwrap();

    // Wrong source queue: nothing happens.
    assert!(
        !store
            .move_bundle(&b.bundle_id, QueueName::Pending, QueueName::Delivered)
            .await
            .unwrap()
    );
    assert_eq!(store.queue_of(&b.bundle_id).await.unwrap(), Some(QueueName::Outbox));

    assert!(
        store
            .move_bundle(&b.bundle_id, QueueName::Outbox, QueueName::Pending)
            .await
            .unwrap()
    );
    assert_eq!(store.queue_of(&b.bundle_id).await.unwrap(), Some(QueueName::Pending));
}

#[tokio::test]
async fn list_orders_by_priority_then_age() {
    let store = QueueStore::open_in_memory().unwrap();
    let low = bundle_with_age("low", Priority::Low, 300);
    let normal_old = bundle_with_age("normal-old", Priority::Normal, 200);
    let normal_new = bundle_with_age("normal-new", Priority::Normal, 100);
    let emergency = bundle_with_age("urgent", Priority::Emergency, 10);

    for b in [&low, &normal_new, &normal_old, &emergency] {
        store.enqueue(QueueName::Pending, b).await.unwrap();
    }

    let listed = store.list(QueueName::Pending, 10, 0).await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|b| b.bundle_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            emergency.bundle_id.as_str(),
            normal_old.bundle_id.as_str(),
            normal_new.bundle_id.as_str(),
            low.bundle_id.as_str(),
        ]
    );

    // Pagination walks the same order.
    let page = store.list(QueueName::Pending, 2, 1).await.unwrap();
    assert_eq!(page[0].bundle_id, normal_old.bundle_id);
    assert_eq!(page[1].bundle_id, normal_new.bundle_id);
}

#[tokio::test]
async fn exists_in_checks_only_named_queues() {
    let store = QueueStore::open_in_memory().unwrap();
    let b = bundle("a", Priority::Normal);
    store.enqueue(QueueName::Outbox, &b).await.unwrap();

    assert!(store.exists(&b.bundle_id).await.unwrap());
    assert!(
        store
            .exists_in(&b.bundle_id, &[QueueName::Outbox, QueueName::Pending])
            .await
            .unwrap()
    );
    assert!(
        !store
            .exists_in(&b.bundle_id, &[QueueName::Inbox, QueueName::Quarantine])
            .await
            .unwrap()
    );
    assert!(!store.exists_in(&b.bundle_id, &[]).await.unwrap());
}

#[tokio::test]
async fn expired_scan_skips_terminal_queues() {
    let store = QueueStore::open_in_memory().unwrap();
    let mut stale = bundle("stale", Priority::Normal);
    stale.expires_at = stale.created_at - Duration::hours(1);
    stale.bundle_id = stale.calculate_bundle_id().unwrap();
    let fresh = bundle("fresh", Priority::Normal);
    let mut quarantined = bundle("quarantined", Priority::Normal);
    quarantined.expires_at = quarantined.created_at - Duration::hours(1);
    quarantined.bundle_id = quarantined.calculate_bundle_id().unwrap();

    store.enqueue(QueueName::Inbox, &stale).await.unwrap();
    store.enqueue(QueueName::Inbox, &fresh).await.unwrap();
    store
        .enqueue_quarantined(&quarantined, "Invalid signature")
        .await
        .unwrap();

    let expired = store.expired_in_live_queues(now_utc()).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].0, QueueName::Inbox);
    assert_eq!(expired[0].1.bundle_id, stale.bundle_id);
}

#[tokio::test]
async fn quarantine_reason_is_recorded() {
    let store = QueueStore::open_in_memory().unwrap();
    let b = bundle("bad", Priority::Normal);
    store
        .enqueue_quarantined(&b, "Invalid signature")
        .await
        .unwrap();

    assert_eq!(
        store.quarantine_reason(&b.bundle_id).await.unwrap(),
        Some("Invalid signature".to_string())
    );
    // Non-quarantined bundles report no reason.
    let ok = bundle("ok", Priority::Normal);
    store.enqueue(QueueName::Inbox, &ok).await.unwrap();
    assert_eq!(store.quarantine_reason(&ok.bundle_id).await.unwrap(), None);
}

#[tokio::test]
async fn total_size_tracks_inserts_and_deletes() {
    let store = QueueStore::open_in_memory().unwrap();
    assert_eq!(store.total_stored_size().await.unwrap(), 0);

    let a = bundle("a", Priority::Normal);
    let b = bundle("bb", Priority::Normal);
    store.enqueue(QueueName::Inbox, &a).await.unwrap();
    store.enqueue(QueueName::Inbox, &b).await.unwrap();

    let expected = a.payload_size_bytes().unwrap() + b.payload_size_bytes().unwrap();
    assert_eq!(store.total_stored_size().await.unwrap(), expected);

    store.delete(&a.bundle_id).await.unwrap();
    assert_eq!(
        store.total_stored_size().await.unwrap(),
        b.payload_size_bytes().unwrap()
    );
}

#[tokio::test]
async fn increment_hop_respects_the_limit() {
    let store = QueueStore::open_in_memory().unwrap();
    let mut b = bundle("hops", Priority::Normal);
    b.hop_limit = 2;
    b.bundle_id = b.calculate_bundle_id().unwrap();
    store.enqueue(QueueName::Pending, &b).await.unwrap();

    assert!(store.increment_hop(&b.bundle_id).await.unwrap());
    assert!(store.increment_hop(&b.bundle_id).await.unwrap());
    // At the limit now; further increments refuse.
    assert!(!store.increment_hop(&b.bundle_id).await.unwrap());
    let stored = store.get(&b.bundle_id).await.unwrap().unwrap();
    assert_eq!(stored.hop_count, 2);
}

#[tokio::test]
async fn round_trip_preserves_every_field() {
    let store = QueueStore::open_in_memory().unwrap();
    let mut b = bundle("full", Priority::Perishable);
    b.audience = Audience::Trusted;
    b.receipt_policy = ReceiptPolicy::Required;
    b.tags = vec!["food".into(), "urgent".into()];
    b.hop_count = 3;
    b.bundle_id = b.calculate_bundle_id().unwrap();

    store.enqueue(QueueName::Inbox, &b).await.unwrap();
    let back = store.get(&b.bundle_id).await.unwrap().unwrap();
    assert_eq!(back, b);
}

#[tokio::test]
async fn purge_older_than_only_touches_named_queue() {
    let store = QueueStore::open_in_memory().unwrap();
    let a = bundle("a", Priority::Normal);
    let b = bundle("b", Priority::Normal);
    store.enqueue(QueueName::Expired, &a).await.unwrap();
    store.enqueue(QueueName::Inbox, &b).await.unwrap();

    // Cutoff in the future: everything in `expired` is older than it.
    let purged = store
        .purge_older_than(QueueName::Expired, now_utc() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(!store.exists(&a.bundle_id).await.unwrap());
    assert!(store.exists(&b.bundle_id).await.unwrap());
}

#[tokio::test]
async fn persists_across_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bundles.db");
    let b = bundle("durable", Priority::Normal);

    {
        let store = QueueStore::open(&path).unwrap();
        store.enqueue(QueueName::Outbox, &b).await.unwrap();
    }
    let store = QueueStore::open(&path).unwrap();
    assert_eq!(store.queue_of(&b.bundle_id).await.unwrap(), Some(QueueName::Outbox));
    assert_eq!(store.get(&b.bundle_id).await.unwrap().unwrap(), b);
}
