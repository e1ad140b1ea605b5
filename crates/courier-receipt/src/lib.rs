// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt emission, ingestion, and delivery-status timelines.
//!
//! A receipt is itself a bundle (`payloadType = "dtn:receipt"`) reporting a
//! lifecycle event of another bundle back to its author. Whether one is
//! emitted depends on the original's receipt policy:
//!
//! | event | `requested` | `required` |
//! |---|---|---|
//! | received | yes | yes |
//! | forwarded | — | yes |
//! | delivered | yes | yes |
//! | expired | — | yes |
//! | deleted | — | yes |
//!
//! Receipt bundles carry `receiptPolicy = none` (no receipts for receipts)
//! and `priority = normal`. Delivery status is reconstructed from observed
//! receipts, ordered by the reporter's stated timestamp.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use courier_model::{
    Audience, Bundle, BundleDraft, Priority, QueueName, ReceiptPolicy, canonical_time, now_utc,
};
use courier_service::{BundleService, ServiceError};
use courier_store::{QueueStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Payload type identifying receipt bundles on the wire.
pub const RECEIPT_PAYLOAD_TYPE: &str = "dtn:receipt";

/// How long receipt bundles live.
const RECEIPT_TTL_HOURS: i64 = 24;

/// How many inbox rows a status query scans.
const STATUS_SCAN_LIMIT: usize = 1000;

/// Lifecycle events a receipt can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptType {
    /// The bundle arrived at a node.
    Received,
    /// The bundle was forwarded another hop.
    Forwarded,
    /// The bundle reached its destination.
    Delivered,
    /// The bundle aged out before delivery.
    Expired,
    /// The bundle was deleted (for example by cache eviction).
    Deleted,
}

impl ReceiptType {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptType::Received => "received",
            ReceiptType::Forwarded => "forwarded",
            ReceiptType::Delivered => "delivered",
            ReceiptType::Expired => "expired",
            ReceiptType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ReceiptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical receipt payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptPayload {
    /// Address of the bundle this receipt reports on.
    pub original_bundle_id: String,
    /// Which lifecycle event happened.
    pub receipt_type: ReceiptType,
    /// Fingerprint of the reporting node.
    pub reporter_node_id: String,
    /// When the reporter says it happened.
    #[serde(with = "canonical_time")]
    pub timestamp: DateTime<Utc>,
    /// Optional detail (for example an eviction reason).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReceiptPayload {
    /// Render into a bundle payload map.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if serialization fails.
    pub fn to_map(&self) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            // A struct always serializes to an object.
            other => Err(serde::ser::Error::custom(format!(
                "receipt payload serialized to {other:?}"
            ))),
        }
    }

    /// Parse a receipt out of a bundle, if it is one.
    #[must_use]
    pub fn from_bundle(bundle: &Bundle) -> Option<Self> {
        if bundle.payload_type != RECEIPT_PAYLOAD_TYPE {
            return None;
        }
        match serde_json::from_value(serde_json::Value::Object(bundle.payload.clone())) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(bundle_id = %bundle.bundle_id, error = %e, "skipping malformed receipt payload");
                None
            }
        }
    }
}

/// Whether `policy` asks for a receipt on `event`.
#[must_use]
pub fn should_emit(policy: ReceiptPolicy, event: ReceiptType) -> bool {
    match policy {
        ReceiptPolicy::None => false,
        ReceiptPolicy::Requested => {
            matches!(event, ReceiptType::Received | ReceiptType::Delivered)
        }
        ReceiptPolicy::Required => true,
    }
}

/// One observed receipt in a delivery timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    /// Which event was reported.
    pub receipt_type: ReceiptType,
    /// Who reported it.
    pub reporter: String,
    /// When the reporter says it happened.
    #[serde(with = "canonical_time")]
    pub timestamp: DateTime<Utc>,
    /// Optional detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Aggregated delivery status for one bundle.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStatus {
    /// The bundle being reported on.
    pub bundle_id: String,
    /// Receipts observed.
    pub receipt_count: usize,
    /// A `received` receipt was observed.
    pub received: bool,
    /// A `forwarded` receipt was observed.
    pub forwarded: bool,
    /// A `delivered` receipt was observed.
    pub delivered: bool,
    /// An `expired` receipt was observed.
    pub expired: bool,
    /// A `deleted` receipt was observed.
    pub deleted: bool,
    /// Receipts ordered by reporter timestamp, deduplicated per
    /// (event, reporter) pair.
    pub timeline: Vec<TimelineEntry>,
}

/// The receipt service.
pub struct ReceiptService {
    bundles: Arc<BundleService>,
    store: Arc<QueueStore>,
    node_id: String,
}

impl fmt::Debug for ReceiptService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiptService")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl ReceiptService {
    /// Build the service; `node_id` is this node's key fingerprint.
    #[must_use]
    pub fn new(bundles: Arc<BundleService>, store: Arc<QueueStore>, node_id: impl Into<String>) -> Self {
        Self {
            bundles,
            store,
            node_id: node_id.into(),
        }
    }

    /// Emit a receipt for `original` if its policy asks for one on `event`.
    ///
    /// The receipt bundle is authored locally into `outbox`, addressed to
    /// the original's author. Receipts are never receipted.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if authoring the receipt bundle fails.
    pub async fn emit(
        &self,
        original: &Bundle,
        event: ReceiptType,
        reason: Option<String>,
    ) -> Result<Option<Bundle>, ServiceError> {
        if original.payload_type == RECEIPT_PAYLOAD_TYPE {
            return Ok(None);
        }
        if !should_emit(original.receipt_policy, event) {
            return Ok(None);
        }

        let payload = ReceiptPayload {
            original_bundle_id: original.bundle_id.clone(),
            receipt_type: event,
            reporter_node_id: self.node_id.clone(),
            timestamp: now_utc(),
            reason,
        };
        let draft = BundleDraft::new("coordination", RECEIPT_PAYLOAD_TYPE, payload.to_map()?)
            .priority(Priority::Normal)
            .audience(Audience::Private)
            .receipt_policy(ReceiptPolicy::None)
            .tag("receipt")
            .tag(event.as_str())
            .ttl_hours(RECEIPT_TTL_HOURS);

        let receipt = self.bundles.create_bundle(draft).await?;
        info!(
            original = %original.bundle_id,
            receipt = %receipt.bundle_id,
            event = %event,
            "emitted receipt"
        );
        Ok(Some(receipt))
    }

    /// Interpret an inbound bundle as a receipt, if it is one.
    ///
    /// A `delivered` receipt also records the delivery locally, moving the
    /// original out of `pending` (or `outbox`) into `delivered`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn ingest(&self, bundle: &Bundle) -> Result<Option<ReceiptPayload>, StoreError> {
        let Some(payload) = ReceiptPayload::from_bundle(bundle) else {
            return Ok(None);
        };
        debug!(
            original = %payload.original_bundle_id,
            event = %payload.receipt_type,
            reporter = %payload.reporter_node_id,
            "observed receipt"
        );
        if payload.receipt_type == ReceiptType::Delivered {
            let moved = self
                .store
                .move_bundle(
                    &payload.original_bundle_id,
                    QueueName::Pending,
                    QueueName::Delivered,
                )
                .await?
                || self
                    .store
                    .move_bundle(
                        &payload.original_bundle_id,
                        QueueName::Outbox,
                        QueueName::Delivered,
                    )
                    .await?;
            if moved {
                info!(original = %payload.original_bundle_id, "bundle marked delivered");
            }
        }
        Ok(Some(payload))
    }

    /// Every receipt observed for `original_id`, unordered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn receipts_for(&self, original_id: &str) -> Result<Vec<ReceiptPayload>, StoreError> {
        let inbox = self
            .store
            .list(QueueName::Inbox, STATUS_SCAN_LIMIT, 0)
            .await?;
        Ok(inbox
            .iter()
            .filter_map(ReceiptPayload::from_bundle)
            .filter(|r| r.original_bundle_id == original_id)
            .collect())
    }

    /// Aggregate delivery status for `original_id`.
    ///
    /// The timeline is sorted by reporter timestamp and deduplicated per
    /// (event, reporter) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn delivery_status(&self, original_id: &str) -> Result<DeliveryStatus, StoreError> {
        let mut receipts = self.receipts_for(original_id).await?;
        receipts.sort_by_key(|r| r.timestamp);

        let mut status = DeliveryStatus {
            bundle_id: original_id.to_string(),
            receipt_count: 0,
            received: false,
            forwarded: false,
            delivered: false,
            expired: false,
            deleted: false,
            timeline: Vec::new(),
        };

        let mut seen: BTreeSet<(ReceiptType, String)> = BTreeSet::new();
        for receipt in receipts {
            if !seen.insert((receipt.receipt_type, receipt.reporter_node_id.clone())) {
                continue;
            }
            match receipt.receipt_type {
                ReceiptType::Received => status.received = true,
                ReceiptType::Forwarded => status.forwarded = true,
                ReceiptType::Delivered => status.delivered = true,
                ReceiptType::Expired => status.expired = true,
                ReceiptType::Deleted => status.deleted = true,
            }
            status.timeline.push(TimelineEntry {
                receipt_type: receipt.receipt_type,
                reporter: receipt.reporter_node_id,
                timestamp: receipt.timestamp,
                reason: receipt.reason,
            });
        }
        status.receipt_count = status.timeline.len();
        if status.receipt_count == 0 {
            warn!(bundle_id = original_id, "no receipts observed");
        }
        Ok(status)
    }
}
