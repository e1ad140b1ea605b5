// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pairwise bundle sync protocol over an opaque transport.
//!
//! The session vocabulary is four request kinds — `index`, `request`,
//! `push`, `pull` — plus their responses and a closing `bye`. One side (the
//! initiator) drives a round; both peers run rounds in both directions to
//! converge. The transport only moves [`SyncMessage`] values; bundles cross
//! the boundary in their canonical serde form, so a receiver's recomputed
//! address matches byte-for-byte.
//!
//! Progress is durable per bundle: every accepted bundle commits
//! independently, and a session aborted at any message boundary loses
//! nothing already stored.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod endpoint;
mod session;
mod transport;

pub use endpoint::{AdmitDisposition, Admitted, SyncEndpoint};
pub use session::{SyncReport, SyncSession};
pub use transport::{ChannelTransport, SyncTransport};

use chrono::{DateTime, Utc};
use courier_model::{Bundle, Priority, QueueName, canonical_time};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors arising from encoding, transport, or protocol violations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization or deserialization failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The transport closed mid-session. Partial progress is durable.
    #[error("transport closed")]
    Closed,

    /// Received a message type that was not expected at this point.
    #[error("unexpected message: expected {expected}, got {got}")]
    Unexpected {
        /// The message kind that was expected.
        expected: &'static str,
        /// The message kind that actually arrived.
        got: &'static str,
    },

    /// Local persistence failed.
    #[error(transparent)]
    Store(#[from] courier_store::StoreError),

    /// The local bundle façade failed.
    #[error(transparent)]
    Service(#[from] courier_service::ServiceError),
}

/// One line of a sync index: enough to decide whether to request the
/// bundle, without moving its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Content address.
    pub bundle_id: String,
    /// Forwarding class.
    pub priority: Priority,
    /// Creation instant.
    #[serde(with = "canonical_time")]
    pub created_at: DateTime<Utc>,
    /// Expiry instant.
    #[serde(with = "canonical_time")]
    pub expires_at: DateTime<Utc>,
    /// Serialized payload size in bytes.
    pub size_bytes: u64,
}

impl IndexEntry {
    /// Build an entry for a bundle.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the payload cannot be sized.
    pub fn for_bundle(bundle: &Bundle) -> Result<Self, serde_json::Error> {
        Ok(Self {
            bundle_id: bundle.bundle_id.clone(),
            priority: bundle.priority,
            created_at: bundle.created_at,
            expires_at: bundle.expires_at,
            size_bytes: bundle.payload_size_bytes()?,
        })
    }
}

/// Per-bundle outcome of a `push`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    /// Content address of the pushed bundle.
    pub bundle_id: String,
    /// Whether the receiver stored it.
    pub accepted: bool,
    /// Stable outcome string (`"ok"`, `"Bundle already exists"`, ...).
    pub reason: String,
}

/// The session vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Ask for a lightweight index of a queue.
    Index {
        /// Which queue to index (normally `pending`).
        queue: QueueName,
        /// Cap on returned entries.
        up_to: usize,
    },
    /// Index response.
    IndexOk {
        /// One line per available bundle.
        entries: Vec<IndexEntry>,
    },
    /// Ask for specific bundles by address.
    Request {
        /// Addresses to fetch.
        bundle_ids: Vec<String>,
    },
    /// Request response; only bundles the peer may carry.
    RequestOk {
        /// Full bundles, forwarding-filtered.
        bundles: Vec<Bundle>,
    },
    /// Offer bundles to the peer.
    Push {
        /// Full bundles, in forwarding priority order.
        bundles: Vec<Bundle>,
    },
    /// Push response.
    PushOk {
        /// Per-bundle outcomes, in offer order.
        results: Vec<PushResult>,
    },
    /// Ask the peer to select and send forwardable bundles.
    Pull {
        /// Cap on returned bundles.
        max: usize,
    },
    /// Pull response, in forwarding priority order.
    PullOk {
        /// Full bundles, forwarding-filtered.
        bundles: Vec<Bundle>,
    },
    /// Close the session.
    Bye {
        /// Optional close annotation.
        reason: Option<String>,
    },
}

impl SyncMessage {
    /// Wire tag of this message, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Index { .. } => "index",
            SyncMessage::IndexOk { .. } => "index_ok",
            SyncMessage::Request { .. } => "request",
            SyncMessage::RequestOk { .. } => "request_ok",
            SyncMessage::Push { .. } => "push",
            SyncMessage::PushOk { .. } => "push_ok",
            SyncMessage::Pull { .. } => "pull",
            SyncMessage::PullOk { .. } => "pull_ok",
            SyncMessage::Bye { .. } => "bye",
        }
    }
}

/// Stateless codec for framing [`SyncMessage`]s as newline-delimited JSON.
///
/// The framing is implementation-defined; what matters is that bundles
/// inside the frame keep their canonical byte form, which plain serde
/// serialization guarantees here.
#[derive(Debug, Clone, Copy)]
pub struct JsonlCodec;

impl JsonlCodec {
    /// Serialize a message to a newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Json`] if the message cannot be serialized.
    pub fn encode(msg: &SyncMessage) -> Result<String, SyncError> {
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');
        Ok(line)
    }

    /// Deserialize a single JSON line into a message.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Json`] if the line does not parse.
    pub fn decode(line: &str) -> Result<SyncMessage, SyncError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}
