// SPDX-License-Identifier: MIT OR Apache-2.0
//! Classification vocabularies shared across the courier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bundle priority. Lower rank forwards first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Never deferred; forwarded before every other class.
    Emergency,
    /// Time-sensitive content that loses value quickly.
    Perishable,
    /// Default priority.
    Normal,
    /// Background traffic, first to be evicted.
    Low,
}

impl Priority {
    /// All priorities in forwarding order (emergency first).
    pub const ALL: [Priority; 4] = [
        Priority::Emergency,
        Priority::Perishable,
        Priority::Normal,
        Priority::Low,
    ];

    /// Forwarding rank: emergency=1 < perishable=2 < normal=3 < low=4.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Priority::Emergency => 1,
            Priority::Perishable => 2,
            Priority::Normal => 3,
            Priority::Low => 4,
        }
    }

    /// Stable wire string for this priority.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Emergency => "emergency",
            Priority::Perishable => "perishable",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// Parse the wire string back into a priority.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "emergency" => Some(Priority::Emergency),
            "perishable" => Some(Priority::Perishable),
            "normal" => Some(Priority::Normal),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may carry and who may read a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    /// Anyone may carry.
    Public,
    /// Only peers inside the community boundary.
    Local,
    /// Only peers meeting the trust threshold.
    Trusted,
    /// Direct delivery to verified keys only.
    Private,
}

impl Audience {
    /// Stable wire string for this audience.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Public => "public",
            Audience::Local => "local",
            Audience::Trusted => "trusted",
            Audience::Private => "private",
        }
    }

    /// Parse the wire string back into an audience.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Audience::Public),
            "local" => Some(Audience::Local),
            "trusted" => Some(Audience::Trusted),
            "private" => Some(Audience::Private),
            _ => None,
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How eagerly lifecycle receipts are emitted for a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptPolicy {
    /// Never emit receipts.
    None,
    /// Emit receipts for received/delivered events.
    Requested,
    /// Emit receipts for every lifecycle event.
    Required,
}

impl ReceiptPolicy {
    /// Stable wire string for this policy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptPolicy::None => "none",
            ReceiptPolicy::Requested => "requested",
            ReceiptPolicy::Required => "required",
        }
    }

    /// Parse the wire string back into a policy.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(ReceiptPolicy::None),
            "requested" => Some(ReceiptPolicy::Requested),
            "required" => Some(ReceiptPolicy::Required),
            _ => None,
        }
    }
}

impl fmt::Display for ReceiptPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle position of a stored bundle.
///
/// The queue is a mutable attribute attached to the bundle by the store; a
/// bundle sits in exactly one queue at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    /// Received, validated bundles awaiting local processing.
    Inbox,
    /// Locally authored bundles awaiting first forward.
    Outbox,
    /// Bundles ready for opportunistic forwarding to peers.
    Pending,
    /// Bundles for which a delivery receipt has been observed.
    Delivered,
    /// Bundles past their expiry, retained for audit.
    Expired,
    /// Bundles that failed validation on receipt, retained for audit.
    Quarantine,
}

impl QueueName {
    /// Every queue.
    pub const ALL: [QueueName; 6] = [
        QueueName::Inbox,
        QueueName::Outbox,
        QueueName::Pending,
        QueueName::Delivered,
        QueueName::Expired,
        QueueName::Quarantine,
    ];

    /// Queues whose bundles are still part of the active lifecycle (the TTL
    /// engine ages these into `expired`).
    pub const LIVE: [QueueName; 4] = [
        QueueName::Inbox,
        QueueName::Outbox,
        QueueName::Pending,
        QueueName::Delivered,
    ];

    /// Stable wire string for this queue.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Inbox => "inbox",
            QueueName::Outbox => "outbox",
            QueueName::Pending => "pending",
            QueueName::Delivered => "delivered",
            QueueName::Expired => "expired",
            QueueName::Quarantine => "quarantine",
        }
    }

    /// Parse the wire string back into a queue name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbox" => Some(QueueName::Inbox),
            "outbox" => Some(QueueName::Outbox),
            "pending" => Some(QueueName::Pending),
            "delivered" => Some(QueueName::Delivered),
            "expired" => Some(QueueName::Expired),
            "quarantine" => Some(QueueName::Quarantine),
            _ => None,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
