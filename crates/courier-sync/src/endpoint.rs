// SPDX-License-Identifier: MIT OR Apache-2.0
//! The responder side of a sync session.

use crate::{IndexEntry, PushResult, SyncError, SyncMessage, SyncTransport};
use courier_cache::{BUDGET_EXCEEDED, CacheBudget};
use courier_model::Bundle;
use courier_policy::{ForwardingPolicy, PeerContext};
use courier_receipt::{ReceiptService, ReceiptType};
use courier_service::BundleService;
use courier_store::QueueStore;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Where an offered bundle ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDisposition {
    /// Stored in `inbox` (or moved there as a reappearance).
    Accepted,
    /// Failed validation; stored in `quarantine`.
    Quarantined,
    /// Refused without storage: duplicate or cache budget.
    Refused,
}

/// Outcome of admitting one offered bundle.
#[derive(Debug, Clone)]
pub struct Admitted {
    /// The wire-level result reported to the offering peer.
    pub result: PushResult,
    /// How the bundle was routed locally.
    pub disposition: AdmitDisposition,
}

/// Serves a peer's sync requests against the local queues.
#[derive(Clone)]
pub struct SyncEndpoint {
    store: Arc<QueueStore>,
    service: Arc<BundleService>,
    receipts: Arc<ReceiptService>,
    policy: Arc<ForwardingPolicy>,
    cache: Arc<CacheBudget>,
}

impl std::fmt::Debug for SyncEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEndpoint").finish_non_exhaustive()
    }
}

impl SyncEndpoint {
    /// Wire the endpoint over the local components.
    #[must_use]
    pub fn new(
        store: Arc<QueueStore>,
        service: Arc<BundleService>,
        receipts: Arc<ReceiptService>,
        policy: Arc<ForwardingPolicy>,
        cache: Arc<CacheBudget>,
    ) -> Self {
        Self {
            store,
            service,
            receipts,
            policy,
            cache,
        }
    }

    /// The queue store this endpoint serves from.
    #[must_use]
    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }

    /// The forwarding policy this endpoint applies.
    #[must_use]
    pub fn policy(&self) -> &Arc<ForwardingPolicy> {
        &self.policy
    }

    /// Answer one request from `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unexpected`] for response-kind messages and
    /// local failures for persistence errors.
    pub async fn handle(
        &self,
        msg: SyncMessage,
        peer: &PeerContext,
    ) -> Result<SyncMessage, SyncError> {
        match msg {
            SyncMessage::Index { queue, up_to } => {
                let bundles = self.store.list(queue, up_to, 0).await?;
                let mut entries = Vec::with_capacity(bundles.len());
                for bundle in bundles.iter().filter(|b| !b.is_expired()) {
                    entries.push(IndexEntry::for_bundle(bundle)?);
                }
                Ok(SyncMessage::IndexOk { entries })
            }

            SyncMessage::Request { bundle_ids } => {
                let mut out = Vec::new();
                for id in &bundle_ids {
                    let Some(bundle) = self.store.get(id).await? else {
                        continue;
                    };
                    let decision = self.policy.can_forward_to_peer(&bundle, peer).await;
                    if !decision.allowed {
                        debug!(
                            bundle_id = %id,
                            reason = decision.reason.as_deref().unwrap_or(""),
                            "request filtered"
                        );
                        continue;
                    }
                    out.push(self.egress(&bundle, peer).await?);
                }
                Ok(SyncMessage::RequestOk { bundles: out })
            }

            SyncMessage::Push { bundles } => {
                let mut results = Vec::with_capacity(bundles.len());
                for bundle in bundles {
                    results.push(self.admit_one(bundle).await?.result);
                }
                Ok(SyncMessage::PushOk { results })
            }

            SyncMessage::Pull { max } => {
                let selected = self.policy.select_for_forwarding(max).await?;
                let allowed = self.policy.filter_forwardable(selected, peer).await;
                let mut out = Vec::with_capacity(allowed.len());
                for bundle in &allowed {
                    out.push(self.egress(bundle, peer).await?);
                }
                Ok(SyncMessage::PullOk { bundles: out })
            }

            other => Err(SyncError::Unexpected {
                expected: "index|request|push|pull",
                got: other.kind(),
            }),
        }
    }

    /// Serve requests until the peer says `bye` or the transport closes.
    ///
    /// # Errors
    ///
    /// Returns local persistence failures; a closed transport is a clean
    /// end, not an error.
    #[instrument(skip_all, fields(peer_local = peer.is_local))]
    pub async fn serve<T: SyncTransport>(
        &self,
        transport: &mut T,
        peer: &PeerContext,
    ) -> Result<(), SyncError> {
        loop {
            let msg = match transport.recv().await {
                Ok(SyncMessage::Bye { .. }) | Err(SyncError::Closed) => return Ok(()),
                Ok(msg) => msg,
                Err(e) => return Err(e),
            };
            let response = self.handle(msg, peer).await?;
            transport.send(response).await?;
        }
    }

    /// Admit one offered bundle: cache admission first (a refusal is not a
    /// quarantine — no integrity claim was tested yet), then
    /// validate-and-route through the façade.
    ///
    /// # Errors
    ///
    /// Returns local persistence failures. Validation failures are not
    /// errors; they show up as a `Quarantined` disposition.
    pub async fn admit_one(&self, bundle: Bundle) -> Result<Admitted, SyncError> {
        let bundle_id = bundle.bundle_id.clone();
        let size = bundle.payload_size_bytes()?;

        let admission = self.cache.can_accept(size).await?;
        self.receipt_evictions(&admission.report).await;
        if !admission.accepted {
            warn!(bundle_id = %bundle_id, size, "push refused: {BUDGET_EXCEEDED}");
            return Ok(Admitted {
                result: PushResult {
                    bundle_id,
                    accepted: false,
                    reason: BUDGET_EXCEEDED.to_string(),
                },
                disposition: AdmitDisposition::Refused,
            });
        }

        let outcome = self.service.receive_bundle(bundle.clone()).await?;
        if outcome.accepted() {
            if let Err(e) = self.receipts.emit(&bundle, ReceiptType::Received, None).await {
                warn!(bundle_id = %bundle_id, error = %e, "failed to emit received receipt");
            }
            // Inbound receipts are interpreted on arrival.
            self.receipts.ingest(&bundle).await?;
        }
        let disposition = match &outcome {
            courier_service::ReceiveOutcome::Accepted
            | courier_service::ReceiveOutcome::AcceptedMoved { .. } => AdmitDisposition::Accepted,
            courier_service::ReceiveOutcome::Quarantined { .. } => AdmitDisposition::Quarantined,
            courier_service::ReceiveOutcome::Duplicate
            | courier_service::ReceiveOutcome::Conflicted => AdmitDisposition::Refused,
        };
        Ok(Admitted {
            result: PushResult {
                bundle_id,
                accepted: outcome.accepted(),
                reason: outcome.message(),
            },
            disposition,
        })
    }

    /// Account one successful outbound forward: advance the local copy's
    /// hop count and emit a `forwarded` receipt where policy asks for it.
    ///
    /// # Errors
    ///
    /// Returns local persistence failures.
    pub async fn record_push(&self, bundle: &Bundle, peer: &PeerContext) -> Result<(), SyncError> {
        self.policy.record_forward(&bundle.bundle_id).await?;
        let peer_fp = courier_crypto::fingerprint_of(&peer.public_key_pem);
        if let Err(e) = self
            .receipts
            .emit(
                bundle,
                ReceiptType::Forwarded,
                Some(format!("Forwarded to {peer_fp}")),
            )
            .await
        {
            warn!(bundle_id = %bundle.bundle_id, error = %e, "failed to emit forwarded receipt");
        }
        Ok(())
    }

    /// Account and hand out one outbound bundle: the local copy's hop count
    /// advances, the transmitted copy carries the advanced value.
    async fn egress(&self, bundle: &Bundle, peer: &PeerContext) -> Result<Bundle, SyncError> {
        self.record_push(bundle, peer).await?;
        Ok(bundle.forwarded_copy())
    }

    async fn receipt_evictions(&self, report: &courier_cache::EvictionReport) {
        for evicted in &report.evicted {
            if let Err(e) = self
                .receipts
                .emit(evicted, ReceiptType::Deleted, Some("Cache eviction".to_string()))
                .await
            {
                warn!(bundle_id = %evicted.bundle_id, error = %e, "failed to emit deleted receipt");
            }
        }
    }
}
