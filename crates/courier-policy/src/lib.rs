// SPDX-License-Identifier: MIT OR Apache-2.0
//! Forwarding policy: audience gates, priority selection, hop accounting.
//!
//! Two predicates and one selector. [`ForwardingPolicy::can_forward_to_peer`]
//! is a total function over the audience variants — expired and hop-capped
//! bundles are rejected up front, then each audience maps to its gate.
//! [`ForwardingPolicy::select_for_forwarding`] drains `pending` strictly by
//! priority class, oldest first within a class.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use courier_model::{Bundle, Priority, QueueName};
use courier_store::{QueueStore, StoreError};
use courier_trust::{
    Decision, Keyring, TRUSTED_FORWARD_THRESHOLD, TrustSnapshot, TrustStore,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Everything known about the peer on the other side of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerContext {
    /// The peer's public key (SPKI PEM), as authenticated by the transport.
    pub public_key_pem: String,
    /// Trust score in `[0, 1]`.
    pub trust_score: f64,
    /// Whether the peer is inside the community boundary.
    pub is_local: bool,
}

impl PeerContext {
    /// Context for a peer known only by key, with neutral trust.
    #[must_use]
    pub fn new(public_key_pem: impl Into<String>) -> Self {
        Self {
            public_key_pem: public_key_pem.into(),
            trust_score: 0.5,
            is_local: true,
        }
    }

    /// Set the trust score.
    #[must_use]
    pub fn trust_score(mut self, score: f64) -> Self {
        self.trust_score = score;
        self
    }

    /// Set community membership.
    #[must_use]
    pub fn local(mut self, is_local: bool) -> Self {
        self.is_local = is_local;
        self
    }
}

/// Counts for the forwarding queues.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardingStats {
    /// Bundles awaiting first forward.
    pub outbox_count: u64,
    /// Bundles ready for opportunistic forwarding.
    pub pending_count: u64,
    /// Bundles with an observed delivery receipt.
    pub delivered_count: u64,
    /// `pending` broken down by priority class.
    pub pending_by_priority: BTreeMap<String, u64>,
}

/// The forwarding policy engine.
#[derive(Debug, Clone)]
pub struct ForwardingPolicy {
    store: Arc<QueueStore>,
    trust: Arc<TrustStore>,
}

impl ForwardingPolicy {
    /// Build the policy over the queue store and trust store.
    #[must_use]
    pub fn new(store: Arc<QueueStore>, trust: Arc<TrustStore>) -> Self {
        Self { store, trust }
    }

    /// May `bundle` travel to this peer right now?
    ///
    /// Denial reasons are stable strings: expiry and hop exhaustion come
    /// first, then the audience gate for the peer.
    pub async fn can_forward_to_peer(&self, bundle: &Bundle, peer: &PeerContext) -> Decision {
        let snapshot = self.trust.snapshot().await;
        evaluate_forward(bundle, peer, &snapshot)
    }

    /// Keep only the bundles that may travel to this peer.
    pub async fn filter_forwardable(
        &self,
        bundles: Vec<Bundle>,
        peer: &PeerContext,
    ) -> Vec<Bundle> {
        let snapshot = self.trust.snapshot().await;
        bundles
            .into_iter()
            .filter(|b| {
                let decision = evaluate_forward(b, peer, &snapshot);
                if !decision.allowed {
                    debug!(
                        bundle_id = %b.bundle_id,
                        reason = decision.reason.as_deref().unwrap_or(""),
                        "bundle filtered from forwarding"
                    );
                }
                decision.allowed
            })
            .collect()
    }

    /// Draw up to `max` bundles from `pending` in strict priority order
    /// (every emergency bundle before any perishable one, and so on),
    /// oldest first within a class. Expired and hop-capped bundles are
    /// never selected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn select_for_forwarding(&self, max: usize) -> Result<Vec<Bundle>, StoreError> {
        let mut selected: Vec<Bundle> = Vec::new();
        for priority in Priority::ALL {
            if selected.len() >= max {
                break;
            }
            let remaining = max - selected.len();
            let batch = self
                .store
                .list_priority(QueueName::Pending, priority, remaining)
                .await?;
            selected.extend(
                batch
                    .into_iter()
                    .filter(|b| !b.is_expired() && !b.is_hop_limit_reached()),
            );
        }
        selected.truncate(max);
        Ok(selected)
    }

    /// Stage a locally authored bundle for forwarding: `outbox → pending`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn move_to_pending(&self, bundle_id: &str) -> Result<bool, StoreError> {
        self.store
            .move_bundle(bundle_id, QueueName::Outbox, QueueName::Pending)
            .await
    }

    /// Record an observed delivery: `pending → delivered`, falling back to
    /// `outbox → delivered` for bundles that never left the outbox.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn mark_delivered(&self, bundle_id: &str) -> Result<bool, StoreError> {
        if self
            .store
            .move_bundle(bundle_id, QueueName::Pending, QueueName::Delivered)
            .await?
        {
            return Ok(true);
        }
        self.store
            .move_bundle(bundle_id, QueueName::Outbox, QueueName::Delivered)
            .await
    }

    /// Account a successful forward: advance the local copy's hop count.
    /// The transmitted copy carries the advanced value; the content address
    /// never changes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn record_forward(&self, bundle_id: &str) -> Result<bool, StoreError> {
        self.store.increment_hop(bundle_id).await
    }

    /// Counts for the forwarding queues.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn stats(&self) -> Result<ForwardingStats, StoreError> {
        let outbox_count = self.store.count(QueueName::Outbox).await?;
        let pending_count = self.store.count(QueueName::Pending).await?;
        let delivered_count = self.store.count(QueueName::Delivered).await?;

        let mut pending_by_priority = BTreeMap::new();
        for priority in Priority::ALL {
            let bundles = self
                .store
                .list_priority(QueueName::Pending, priority, 100_000)
                .await?;
            pending_by_priority.insert(priority.as_str().to_string(), bundles.len() as u64);
        }

        Ok(ForwardingStats {
            outbox_count,
            pending_count,
            delivered_count,
            pending_by_priority,
        })
    }
}

/// The forwarding predicate over a trust snapshot.
fn evaluate_forward(bundle: &Bundle, peer: &PeerContext, trust: &TrustSnapshot) -> Decision {
    if bundle.is_expired() {
        return Decision::deny("Bundle expired");
    }
    if bundle.is_hop_limit_reached() {
        return Decision::deny("Hop limit exceeded");
    }
    match bundle.audience {
        courier_model::Audience::Public => Decision::allow(),
        courier_model::Audience::Local => {
            if peer.is_local {
                Decision::allow()
            } else {
                Decision::deny("Bundle audience is local, peer not local")
            }
        }
        courier_model::Audience::Trusted => {
            if peer.trust_score >= TRUSTED_FORWARD_THRESHOLD {
                Decision::allow()
            } else {
                Decision::deny(format!(
                    "Bundle audience is trusted, peer trust score too low ({})",
                    peer.trust_score
                ))
            }
        }
        courier_model::Audience::Private => {
            if trust.is_in_keyring(&peer.public_key_pem, Keyring::Verified) {
                Decision::allow()
            } else {
                Decision::deny("Bundle audience is private, peer key not verified")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use courier_model::{Audience, ReceiptPolicy, now_utc};
    use courier_trust::TrustLevel;
    use serde_json::Map;
    use tempfile::TempDir;

    fn bundle(audience: Audience, priority: Priority, age_secs: i64) -> Bundle {
        let created = now_utc() - Duration::seconds(age_secs);
        let mut payload = Map::new();
        payload.insert("n".into(), serde_json::Value::from(age_secs));
        let mut b = Bundle {
            audience,
            author_public_key: "pk-author".into(),
            bundle_id: String::new(),
            created_at: created,
            expires_at: created + Duration::hours(2),
            hop_count: 0,
            hop_limit: 10,
            payload,
            payload_type: "test:item".into(),
            priority,
            receipt_policy: ReceiptPolicy::None,
            signature: "c2ln".into(),
            tags: vec![],
            topic: "coordination".into(),
        };
        b.bundle_id = b.calculate_bundle_id().unwrap();
        b
    }

    async fn policy(dir: &TempDir) -> (ForwardingPolicy, Arc<QueueStore>, Arc<TrustStore>) {
        let store = Arc::new(QueueStore::open_in_memory().unwrap());
        let trust = Arc::new(TrustStore::load(&dir.path().join("trust.json")).unwrap());
        (
            ForwardingPolicy::new(store.clone(), trust.clone()),
            store,
            trust,
        )
    }

    #[tokio::test]
    async fn expired_bundles_never_forward() {
        let dir = TempDir::new().unwrap();
        let (policy, _, _) = policy(&dir).await;
        let mut b = bundle(Audience::Public, Priority::Normal, 0);
        b.expires_at = b.created_at - Duration::hours(1);
        b.bundle_id = b.calculate_bundle_id().unwrap();
        let decision = policy
            .can_forward_to_peer(&b, &PeerContext::new("pk-peer"))
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("Bundle expired"));
    }

    #[tokio::test]
    async fn hop_capped_bundles_never_forward() {
        let dir = TempDir::new().unwrap();
        let (policy, _, _) = policy(&dir).await;
        let mut b = bundle(Audience::Public, Priority::Normal, 0);
        b.hop_count = b.hop_limit;
        let decision = policy
            .can_forward_to_peer(&b, &PeerContext::new("pk-peer"))
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("Hop limit exceeded"));
    }

    #[tokio::test]
    async fn audience_gates() {
        let dir = TempDir::new().unwrap();
        let (policy, _, trust) = policy(&dir).await;

        let public = bundle(Audience::Public, Priority::Normal, 0);
        let local = bundle(Audience::Local, Priority::Normal, 1);
        let trusted = bundle(Audience::Trusted, Priority::Normal, 2);
        let private = bundle(Audience::Private, Priority::Normal, 3);

        let stranger = PeerContext::new("pk-peer").trust_score(0.5).local(false);
        assert!(policy.can_forward_to_peer(&public, &stranger).await.allowed);
        assert!(!policy.can_forward_to_peer(&local, &stranger).await.allowed);
        assert!(!policy.can_forward_to_peer(&trusted, &stranger).await.allowed);
        assert!(!policy.can_forward_to_peer(&private, &stranger).await.allowed);

        let neighbor = PeerContext::new("pk-peer").trust_score(0.5).local(true);
        assert!(policy.can_forward_to_peer(&local, &neighbor).await.allowed);

        let vetted = PeerContext::new("pk-peer").trust_score(0.7);
        assert!(policy.can_forward_to_peer(&trusted, &vetted).await.allowed);

        // Private needs the peer key in the verified ring, not a score.
        assert!(!policy.can_forward_to_peer(&private, &vetted).await.allowed);
        trust
            .add_key("pk-peer", Keyring::Verified, TrustLevel::Verified)
            .await
            .unwrap();
        assert!(policy.can_forward_to_peer(&private, &vetted).await.allowed);
    }

    #[tokio::test]
    async fn low_trust_reason_names_the_score() {
        let dir = TempDir::new().unwrap();
        let (policy, _, _) = policy(&dir).await;
        let trusted = bundle(Audience::Trusted, Priority::Normal, 0);
        let peer = PeerContext::new("pk-peer").trust_score(0.5).local(true);
        let decision = policy.can_forward_to_peer(&trusted, &peer).await;
        assert!(!decision.allowed);
        let reason = decision.reason.unwrap();
        assert!(reason.contains("trust score too low"), "reason: {reason}");
    }

    #[tokio::test]
    async fn selection_is_strict_priority_then_age() {
        let dir = TempDir::new().unwrap();
        let (policy, store, _) = policy(&dir).await;

        let low = bundle(Audience::Public, Priority::Low, 500);
        let normal = bundle(Audience::Public, Priority::Normal, 400);
        let emergency = bundle(Audience::Public, Priority::Emergency, 10);
        for b in [&low, &normal, &emergency] {
            store.enqueue(QueueName::Pending, b).await.unwrap();
        }

        let picked = policy.select_for_forwarding(3).await.unwrap();
        let ids: Vec<&str> = picked.iter().map(|b| b.bundle_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                emergency.bundle_id.as_str(),
                normal.bundle_id.as_str(),
                low.bundle_id.as_str(),
            ]
        );

        let capped = policy.select_for_forwarding(1).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].bundle_id, emergency.bundle_id);
    }

    #[tokio::test]
    async fn selection_skips_expired_and_capped() {
        let dir = TempDir::new().unwrap();
        let (policy, store, _) = policy(&dir).await;

        let mut stale = bundle(Audience::Public, Priority::Emergency, 100);
        stale.expires_at = stale.created_at - Duration::minutes(1);
        stale.bundle_id = stale.calculate_bundle_id().unwrap();
        let mut capped = bundle(Audience::Public, Priority::Emergency, 90);
        capped.hop_count = capped.hop_limit;
        let ok = bundle(Audience::Public, Priority::Low, 80);

        for b in [&stale, &capped, &ok] {
            store.enqueue(QueueName::Pending, b).await.unwrap();
        }
        let picked = policy.select_for_forwarding(10).await.unwrap();
        let ids: Vec<&str> = picked.iter().map(|b| b.bundle_id.as_str()).collect();
        assert_eq!(ids, vec![ok.bundle_id.as_str()]);
    }

    #[tokio::test]
    async fn mark_delivered_falls_back_to_outbox() {
        let dir = TempDir::new().unwrap();
        let (policy, store, _) = policy(&dir).await;

        let staged = bundle(Audience::Public, Priority::Normal, 0);
        store.enqueue(QueueName::Pending, &staged).await.unwrap();
        assert!(policy.mark_delivered(&staged.bundle_id).await.unwrap());
        assert_eq!(
            store.queue_of(&staged.bundle_id).await.unwrap(),
            Some(QueueName::Delivered)
        );

        let unsent = bundle(Audience::Public, Priority::Normal, 1);
        store.enqueue(QueueName::Outbox, &unsent).await.unwrap();
        assert!(policy.mark_delivered(&unsent.bundle_id).await.unwrap());
        assert_eq!(
            store.queue_of(&unsent.bundle_id).await.unwrap(),
            Some(QueueName::Delivered)
        );

        assert!(!policy.mark_delivered("b:sha256:absent").await.unwrap());
    }

    #[tokio::test]
    async fn stats_break_pending_down_by_priority() {
        let dir = TempDir::new().unwrap();
        let (policy, store, _) = policy(&dir).await;

        store
            .enqueue(QueueName::Outbox, &bundle(Audience::Public, Priority::Normal, 0))
            .await
            .unwrap();
        store
            .enqueue(
                QueueName::Pending,
                &bundle(Audience::Public, Priority::Emergency, 1),
            )
            .await
            .unwrap();
        store
            .enqueue(QueueName::Pending, &bundle(Audience::Public, Priority::Low, 2))
            .await
            .unwrap();

        let stats = policy.stats().await.unwrap();
        assert_eq!(stats.outbox_count, 1);
        assert_eq!(stats.pending_count, 2);
        assert_eq!(stats.delivered_count, 0);
        assert_eq!(stats.pending_by_priority["emergency"], 1);
        assert_eq!(stats.pending_by_priority["low"], 1);
        assert_eq!(stats.pending_by_priority["normal"], 0);
    }
}
