// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bundle façade: create-and-sign, receive-and-route, list/get.
//!
//! The create path fills defaults, signs the canonical body, derives the
//! content address, and lands the bundle in `outbox`. The receive path
//! validates (signature, recomputed address, TTL, hop limit) and routes to
//! `inbox` on success or `quarantine` — with the reason recorded — on any
//! failure. Admission is exact-once on the content address; the only
//! mutation a duplicate receive may cause is the single reappearance move
//! of a locally authored bundle back into `inbox`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use courier_crypto::NodeKeys;
use courier_model::{Bundle, BundleDraft, QueueName, ValidationError, now_utc};
use courier_store::{QueueStore, StoreError};
use courier_trust::TrustStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Errors surfaced by the bundle façade.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Persistence failed; state is unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The payload could not be serialized.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The draft cannot become a valid bundle.
    #[error("invalid draft: {0}")]
    InvalidDraft(String),

    /// The trust store refused this audience for this author.
    #[error("{0}")]
    CreationDenied(String),
}

/// How a received bundle was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Validated and stored in `inbox`.
    Accepted,
    /// Already stored locally (authored here); moved into `inbox` as the
    /// reappearance observation.
    AcceptedMoved {
        /// Queue the local copy came from.
        from: QueueName,
    },
    /// Failed validation; stored in `quarantine`.
    Quarantined {
        /// Stable validation failure string.
        reason: String,
    },
    /// Already present in `inbox` or `quarantine`; nothing mutated.
    Duplicate,
    /// Present somewhere no move is permitted from; nothing mutated.
    Conflicted,
}

impl ReceiveOutcome {
    /// Whether the bundle ended up accepted locally.
    #[must_use]
    pub fn accepted(&self) -> bool {
        matches!(self, ReceiveOutcome::Accepted | ReceiveOutcome::AcceptedMoved { .. })
    }

    /// Stable message for callers and wire responses.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            ReceiveOutcome::Accepted | ReceiveOutcome::AcceptedMoved { .. } => "ok".to_string(),
            ReceiveOutcome::Quarantined { reason } => reason.clone(),
            ReceiveOutcome::Duplicate => "Bundle already exists".to_string(),
            ReceiveOutcome::Conflicted => "Bundle exists but couldn't be moved".to_string(),
        }
    }
}

/// The bundle façade.
pub struct BundleService {
    keys: Arc<NodeKeys>,
    store: Arc<QueueStore>,
    trust: Arc<TrustStore>,
    default_hop_limit: u32,
}

impl std::fmt::Debug for BundleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleService")
            .field("default_hop_limit", &self.default_hop_limit)
            .finish_non_exhaustive()
    }
}

impl BundleService {
    /// Build the façade.
    #[must_use]
    pub fn new(
        keys: Arc<NodeKeys>,
        store: Arc<QueueStore>,
        trust: Arc<TrustStore>,
        default_hop_limit: u32,
    ) -> Self {
        Self {
            keys,
            store,
            trust,
            default_hop_limit,
        }
    }

    /// The signing keys this node authors with.
    #[must_use]
    pub fn keys(&self) -> &Arc<NodeKeys> {
        &self.keys
    }

    /// Author a bundle: fill defaults, sign, derive the address, enqueue to
    /// `outbox`.
    ///
    /// Re-creating bit-identical content is a no-op (the address collides
    /// with the stored copy) and still succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::CreationDenied`] when the trust store
    /// refuses the audience, [`ServiceError::InvalidDraft`] for impossible
    /// drafts, and [`ServiceError::Store`] on persistence failure.
    pub async fn create_bundle(&self, draft: BundleDraft) -> Result<Bundle, ServiceError> {
        let author = self.keys.public_key_pem();
        let decision = self
            .trust
            .enforce_creation_policy(draft.audience, author)
            .await;
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "audience denied".to_string());
            return Err(ServiceError::CreationDenied(reason));
        }

        let now = now_utc();
        let expires_at = draft.resolve_expiry(now);
        if expires_at <= now {
            return Err(ServiceError::InvalidDraft(
                "Bundle expiry precedes creation".to_string(),
            ));
        }

        let mut bundle = Bundle {
            audience: draft.audience,
            author_public_key: author.to_string(),
            bundle_id: "b:sha256:placeholder".to_string(),
            created_at: now,
            expires_at,
            hop_count: 0,
            hop_limit: draft.hop_limit.unwrap_or(self.default_hop_limit),
            payload: draft.payload,
            payload_type: draft.payload_type,
            priority: draft.priority,
            receipt_policy: draft.receipt_policy,
            signature: "sig:placeholder".to_string(),
            tags: draft.tags,
            topic: draft.topic,
        };

        let canonical = bundle.canonical_json()?;
        bundle.signature = self.keys.sign(canonical.as_bytes());
        bundle.bundle_id = bundle.calculate_bundle_id()?;

        let inserted = self.store.enqueue(QueueName::Outbox, &bundle).await?;
        if inserted {
            info!(
                bundle_id = %bundle.bundle_id,
                priority = %bundle.priority,
                topic = %bundle.topic,
                "created bundle"
            );
        } else {
            debug!(bundle_id = %bundle.bundle_id, "bit-identical re-creation, keeping stored copy");
        }
        Ok(bundle)
    }

    /// Validate a received bundle: signature, recomputed address, TTL, hop
    /// limit.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] naming the first failed check.
    pub fn validate(&self, bundle: &Bundle) -> Result<(), ValidationError> {
        if !bundle.has_well_formed_id() {
            return Err(ValidationError::MalformedBundleId);
        }
        if bundle.expires_at <= bundle.created_at {
            return Err(ValidationError::ExpiryBeforeCreation);
        }

        // Serialization failure means there is nothing the signature could
        // have covered; treat it as a verification failure.
        let Ok(canonical) = bundle.canonical_json() else {
            return Err(ValidationError::InvalidSignature);
        };
        if !courier_crypto::verify(
            canonical.as_bytes(),
            &bundle.signature,
            &bundle.author_public_key,
        ) {
            return Err(ValidationError::InvalidSignature);
        }

        let Ok(expected) = bundle.calculate_bundle_id() else {
            return Err(ValidationError::InvalidSignature);
        };
        if bundle.bundle_id != expected {
            return Err(ValidationError::BundleIdMismatch {
                expected,
                got: bundle.bundle_id.clone(),
            });
        }

        if bundle.is_expired() {
            return Err(ValidationError::Expired);
        }
        if bundle.is_hop_limit_reached() {
            return Err(ValidationError::HopLimitExceeded);
        }
        Ok(())
    }

    /// Receive a bundle from a peer and route it.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] on persistence failure; validation
    /// failures are recovered locally into `quarantine` and reported
    /// through the outcome, not as errors.
    pub async fn receive_bundle(&self, bundle: Bundle) -> Result<ReceiveOutcome, ServiceError> {
        let id = bundle.bundle_id.clone();

        if self
            .store
            .exists_in(&id, &[QueueName::Inbox, QueueName::Quarantine])
            .await?
        {
            return Ok(ReceiveOutcome::Duplicate);
        }

        if let Err(failure) = self.validate(&bundle) {
            let reason = failure.to_string();
            warn!(bundle_id = %id, %reason, "received bundle failed validation");
            self.store.enqueue_quarantined(&bundle, &reason).await?;
            return Ok(ReceiveOutcome::Quarantined { reason });
        }

        if self.store.enqueue(QueueName::Inbox, &bundle).await? {
            debug!(bundle_id = %id, "received bundle into inbox");
            return Ok(ReceiveOutcome::Accepted);
        }

        // The insert lost to an existing record. A copy that reached inbox
        // or quarantine concurrently is a duplicate; a locally authored
        // copy still in the send-side queues gets the one permitted move —
        // its reappearance from the network is the observation.
        if self
            .store
            .exists_in(&id, &[QueueName::Inbox, QueueName::Quarantine])
            .await?
        {
            return Ok(ReceiveOutcome::Duplicate);
        }
        for from in [
            QueueName::Outbox,
            QueueName::Pending,
            QueueName::Delivered,
            QueueName::Expired,
        ] {
            if self.store.move_bundle(&id, from, QueueName::Inbox).await? {
                info!(bundle_id = %id, from = %from, "local bundle reappeared from network");
                return Ok(ReceiveOutcome::AcceptedMoved { from });
            }
        }
        Ok(ReceiveOutcome::Conflicted)
    }

    /// Fetch a bundle by id.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] on persistence failure.
    pub async fn get_bundle(&self, bundle_id: &str) -> Result<Option<Bundle>, ServiceError> {
        Ok(self.store.get(bundle_id).await?)
    }

    /// List a queue in forwarding order.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] on persistence failure.
    pub async fn list_bundles(
        &self,
        queue: QueueName,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Bundle>, ServiceError> {
        Ok(self.store.list(queue, limit, offset).await?)
    }

    /// Count a queue.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] on persistence failure.
    pub async fn count_bundles(&self, queue: QueueName) -> Result<u64, ServiceError> {
        Ok(self.store.count(queue).await?)
    }
}
