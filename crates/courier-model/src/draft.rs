// SPDX-License-Identifier: MIT OR Apache-2.0
//! Caller-facing input for creating a bundle.

use crate::timefmt::canonical_time;
use crate::vocab::{Audience, Priority, ReceiptPolicy};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Everything a caller supplies to author a bundle.
///
/// Identity, signature, address, and (when omitted) expiry are filled in by
/// the bundle service. Built fluently:
///
/// ```
/// use courier_model::{BundleDraft, Priority};
///
/// let draft = BundleDraft::new("mutual-aid", "mesh:offer", Default::default())
///     .priority(Priority::Perishable)
///     .tag("food")
///     .ttl_hours(48);
/// assert_eq!(draft.ttl_hours, Some(48));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleDraft {
    /// Opaque structured payload.
    pub payload: Map<String, Value>,
    /// Schema identifier for the payload.
    pub payload_type: String,
    /// Forwarding class; defaults to `normal`.
    pub priority: Priority,
    /// Carrier/reader class; defaults to `public`.
    pub audience: Audience,
    /// Free-form topic.
    pub topic: String,
    /// Given-order routing labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Maximum forwards; the node default applies when absent.
    #[serde(default)]
    pub hop_limit: Option<u32>,
    /// Receipt emission policy; defaults to `none`.
    pub receipt_policy: ReceiptPolicy,
    /// Explicit expiry. Wins over `ttl_hours`.
    #[serde(default, with = "optional_canonical_time")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Expiry as an offset from creation, if `expires_at` is absent.
    #[serde(default)]
    pub ttl_hours: Option<i64>,
}

impl BundleDraft {
    /// Start a draft with the required fields; everything else defaults.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        payload_type: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            payload,
            payload_type: payload_type.into(),
            priority: Priority::Normal,
            audience: Audience::Public,
            topic: topic.into(),
            tags: Vec::new(),
            hop_limit: None,
            receipt_policy: ReceiptPolicy::None,
            expires_at: None,
            ttl_hours: None,
        }
    }

    /// Set the forwarding class.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the audience.
    #[must_use]
    pub fn audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    /// Append one routing label.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the hop limit explicitly.
    #[must_use]
    pub fn hop_limit(mut self, limit: u32) -> Self {
        self.hop_limit = Some(limit);
        self
    }

    /// Set the receipt policy.
    #[must_use]
    pub fn receipt_policy(mut self, policy: ReceiptPolicy) -> Self {
        self.receipt_policy = policy;
        self
    }

    /// Set an explicit expiry instant.
    #[must_use]
    pub fn expires_at(mut self, when: DateTime<Utc>) -> Self {
        self.expires_at = Some(when);
        self
    }

    /// Set the expiry as hours from creation.
    #[must_use]
    pub fn ttl_hours(mut self, hours: i64) -> Self {
        self.ttl_hours = Some(hours);
        self
    }

    /// Resolve the expiry for a bundle created at `created_at`: explicit
    /// instant, then `ttl_hours`, then the default-TTL table.
    #[must_use]
    pub fn resolve_expiry(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(when) = self.expires_at {
            return when;
        }
        if let Some(hours) = self.ttl_hours {
            return created_at + Duration::hours(hours);
        }
        crate::ttl::default_expiry(self.priority, &self.topic, &self.tags, created_at)
    }
}

mod optional_canonical_time {
    use super::canonical_time;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ts {
            Some(ts) => canonical_time::serialize(ts, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => crate::timefmt::parse_timestamp(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
