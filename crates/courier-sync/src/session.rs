// SPDX-License-Identifier: MIT OR Apache-2.0
//! The initiator side of a sync session.

use crate::{SyncEndpoint, SyncError, SyncMessage, SyncTransport};
use courier_model::QueueName;
use courier_policy::PeerContext;
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

/// What one initiated round achieved.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    /// Addresses we asked the peer for.
    pub requested: usize,
    /// Full bundles the peer returned.
    pub received: usize,
    /// Of those, stored into `inbox`.
    pub accepted: usize,
    /// Of those, routed to `quarantine`.
    pub quarantined: usize,
    /// Of those, refused (duplicates, cache).
    pub rejected: usize,
    /// Bundles we offered the peer.
    pub pushed: usize,
    /// Of those, the peer stored.
    pub push_accepted: usize,
}

/// Drives sync rounds against a peer. The same node also answers the
/// peer's rounds through its [`SyncEndpoint`]; running both directions is
/// what converges the pair.
#[derive(Clone, Debug)]
pub struct SyncSession {
    endpoint: SyncEndpoint,
    max_bundles: usize,
}

impl SyncSession {
    /// Build a session driver over the local endpoint.
    #[must_use]
    pub fn new(endpoint: SyncEndpoint, max_bundles: usize) -> Self {
        Self {
            endpoint,
            max_bundles,
        }
    }

    /// Run one full round: index → request the missing → admit, then push
    /// our own `pending` (priority-ordered, forwarding-filtered), then
    /// `bye`.
    ///
    /// # Errors
    ///
    /// Transport and persistence errors abort the session; everything
    /// admitted before the abort stays admitted.
    #[instrument(skip_all, fields(session = %Uuid::new_v4(), peer_local = peer.is_local))]
    pub async fn run<T: SyncTransport>(
        &self,
        transport: &mut T,
        peer: &PeerContext,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        // 1. What does the peer have?
        transport
            .send(SyncMessage::Index {
                queue: QueueName::Pending,
                up_to: self.max_bundles,
            })
            .await?;
        let entries = match transport.recv().await? {
            SyncMessage::IndexOk { entries } => entries,
            other => {
                return Err(SyncError::Unexpected {
                    expected: "index_ok",
                    got: other.kind(),
                });
            }
        };

        // 2. Request what we do not hold — consulting inbox *and*
        //    quarantine; a quarantined copy is never re-requested.
        let mut missing = Vec::new();
        for entry in &entries {
            let held = self
                .endpoint
                .store()
                .exists_in(
                    &entry.bundle_id,
                    &[QueueName::Inbox, QueueName::Quarantine],
                )
                .await?;
            if !held {
                missing.push(entry.bundle_id.clone());
            }
        }
        report.requested = missing.len();

        if !missing.is_empty() {
            transport
                .send(SyncMessage::Request {
                    bundle_ids: missing,
                })
                .await?;
            let bundles = match transport.recv().await? {
                SyncMessage::RequestOk { bundles } => bundles,
                other => {
                    return Err(SyncError::Unexpected {
                        expected: "request_ok",
                        got: other.kind(),
                    });
                }
            };
            report.received = bundles.len();

            // 3. Admit each independently; partial progress is durable.
            for bundle in bundles {
                match self.endpoint.admit_one(bundle).await?.disposition {
                    crate::AdmitDisposition::Accepted => report.accepted += 1,
                    crate::AdmitDisposition::Quarantined => report.quarantined += 1,
                    crate::AdmitDisposition::Refused => report.rejected += 1,
                }
            }
        }

        // 4. Offer our own pending, strictly priority-ordered and filtered
        //    for this peer.
        let selected = self
            .endpoint
            .policy()
            .select_for_forwarding(self.max_bundles)
            .await?;
        let allowed = self.endpoint.policy().filter_forwardable(selected, peer).await;
        report.pushed = allowed.len();
        if !allowed.is_empty() {
            let offer: Vec<_> = allowed.iter().map(|b| b.forwarded_copy()).collect();
            transport.send(SyncMessage::Push { bundles: offer }).await?;
            let results = match transport.recv().await? {
                SyncMessage::PushOk { results } => results,
                other => {
                    return Err(SyncError::Unexpected {
                        expected: "push_ok",
                        got: other.kind(),
                    });
                }
            };
            for result in &results {
                if !result.accepted {
                    continue;
                }
                report.push_accepted += 1;
                if let Some(bundle) = allowed.iter().find(|b| b.bundle_id == result.bundle_id) {
                    self.endpoint.record_push(bundle, peer).await?;
                }
            }
        }

        transport.send(SyncMessage::Bye { reason: None }).await?;
        info!(
            requested = report.requested,
            accepted = report.accepted,
            quarantined = report.quarantined,
            pushed = report.pushed,
            push_accepted = report.push_accepted,
            "sync round complete"
        );
        Ok(report)
    }
}
