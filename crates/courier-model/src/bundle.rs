// SPDX-License-Identifier: MIT OR Apache-2.0
//! The bundle itself: canonical serialization and content addressing.

use crate::timefmt::canonical_time;
use crate::vocab::{Audience, Priority, ReceiptPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Prefix of every content-addressed bundle id.
pub const BUNDLE_ID_PREFIX: &str = "b:sha256:";

/// The immutable transport unit.
///
/// Fields are declared in lexicographic order of their wire names so the
/// plain serde rendering is byte-identical to the canonical serialization
/// (plus the `bundleId`, `signature`, and `hopCount` members). Do not
/// reorder them.
///
/// Everything except `hop_count` is frozen once the bundle is signed:
/// `bundle_id` is the SHA-256 of the canonical form — which excludes
/// `bundleId`, `signature`, and `hopCount` — and `signature` covers those
/// same bytes, so authenticity and addressing verify independently of one
/// another and survive hop accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Bundle {
    /// Who may carry and read this bundle.
    pub audience: Audience,
    /// SPKI PEM of the author's Ed25519 key.
    pub author_public_key: String,
    /// Content address: `b:sha256:` + 64 lowercase hex chars.
    pub bundle_id: String,
    /// Creation instant (UTC, microsecond precision).
    #[serde(with = "canonical_time")]
    pub created_at: DateTime<Utc>,
    /// Expiry instant; always after `created_at`.
    #[serde(with = "canonical_time")]
    pub expires_at: DateTime<Utc>,
    /// Forwards observed so far. Carriage metadata: mutable, and excluded
    /// from the canonical form along with `bundleId` and `signature`.
    pub hop_count: u32,
    /// Maximum number of forwards before the bundle stops propagating.
    pub hop_limit: u32,
    /// Opaque structured payload.
    pub payload: Map<String, Value>,
    /// Schema identifier for the payload (e.g. `dtn:receipt`).
    pub payload_type: String,
    /// Forwarding class.
    pub priority: Priority,
    /// Receipt emission policy.
    pub receipt_policy: ReceiptPolicy,
    /// Base64 Ed25519 signature over the canonical form.
    pub signature: String,
    /// Given-order routing labels.
    pub tags: Vec<String>,
    /// Free-form topic used for TTL defaults and routing hints.
    pub topic: String,
}

impl Bundle {
    /// Canonical JSON: the serde rendering minus `bundleId`, `signature`,
    /// and `hopCount`.
    ///
    /// Keys come out sorted (`serde_json`'s map is a `BTreeMap`) and
    /// timestamps use the fixed microsecond format, so the result is
    /// bit-identical for identical logical content on every platform. This
    /// is the exact byte sequence that is both signed and hashed; leaving
    /// `hopCount` out is what lets forwards advance it without invalidating
    /// the address or the signature.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the payload cannot be serialized.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("bundleId");
            map.remove("signature");
            map.remove("hopCount");
        }
        serde_json::to_string(&value)
    }

    /// Recompute the content address from the canonical form.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the payload cannot be serialized.
    pub fn calculate_bundle_id(&self) -> Result<String, serde_json::Error> {
        let canonical = self.canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{BUNDLE_ID_PREFIX}{:x}", hasher.finalize()))
    }

    /// Size charged against the cache budget: the serialized payload bytes.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the payload cannot be serialized.
    pub fn payload_size_bytes(&self) -> Result<u64, serde_json::Error> {
        Ok(serde_json::to_string(&self.payload)?.len() as u64)
    }

    /// Whether the bundle is past its expiry right now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(crate::timefmt::now_utc())
    }

    /// Whether the bundle is past its expiry at the given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the bundle has used up its hop budget.
    #[must_use]
    pub fn is_hop_limit_reached(&self) -> bool {
        self.hop_count >= self.hop_limit
    }

    /// Copy of this bundle with `hop_count` advanced by one, as transmitted
    /// to a peer on a successful forward. The content address and signature
    /// are unaffected: hop count is carriage metadata, not signed content.
    #[must_use]
    pub fn forwarded_copy(&self) -> Bundle {
        let mut copy = self.clone();
        copy.hop_count = copy.hop_count.saturating_add(1);
        copy
    }

    /// Whether `bundle_id` has the `b:sha256:` + 64-lowercase-hex shape.
    #[must_use]
    pub fn has_well_formed_id(&self) -> bool {
        match self.bundle_id.strip_prefix(BUNDLE_ID_PREFIX) {
            Some(hex) => {
                hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timefmt::now_utc;
    use chrono::Duration;
    use proptest::prelude::*;

    fn sample_bundle() -> Bundle {
        let created = now_utc();
        let mut payload = Map::new();
        payload.insert("note".into(), Value::String("hello mesh".into()));
        payload.insert("qty".into(), Value::from(3));
        let mut b = Bundle {
            audience: Audience::Public,
            author_public_key: "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n"
                .into(),
            bundle_id: String::new(),
            created_at: created,
            expires_at: created + Duration::hours(6),
            hop_count: 0,
            hop_limit: 20,
            payload,
            payload_type: "mesh:note".into(),
            priority: Priority::Normal,
            receipt_policy: ReceiptPolicy::None,
            signature: "c2ln".into(),
            tags: vec!["test".into()],
            topic: "coordination".into(),
        };
        b.bundle_id = b.calculate_bundle_id().unwrap();
        b
    }

    #[test]
    fn canonical_json_excludes_id_and_signature() {
        let b = sample_bundle();
        let canonical = b.canonical_json().unwrap();
        assert!(!canonical.contains("bundleId"));
        assert!(!canonical.contains("signature"));
        assert!(!canonical.contains("hopCount"));
        assert!(canonical.contains("\"payloadType\":\"mesh:note\""));
    }

    #[test]
    fn canonical_json_keys_are_sorted() {
        let b = sample_bundle();
        let canonical = b.canonical_json().unwrap();
        let value: Value = serde_json::from_str(&canonical).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn bundle_id_is_stable_across_round_trips() {
        let b = sample_bundle();
        let wire = serde_json::to_string(&b).unwrap();
        let back: Bundle = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, b);
        assert_eq!(back.calculate_bundle_id().unwrap(), b.bundle_id);
    }

    #[test]
    fn wire_form_matches_canonical_form_plus_id_and_signature() {
        let b = sample_bundle();
        let wire: Value = serde_json::from_str(&serde_json::to_string(&b).unwrap()).unwrap();
        let mut wire_obj = wire.as_object().unwrap().clone();
        wire_obj.remove("bundleId");
        wire_obj.remove("signature");
        wire_obj.remove("hopCount");
        let reduced = serde_json::to_string(&Value::Object(wire_obj)).unwrap();
        assert_eq!(reduced, b.canonical_json().unwrap());
    }

    #[test]
    fn hop_count_does_not_change_the_address() {
        let b = sample_bundle();
        let forwarded = b.forwarded_copy();
        assert_eq!(forwarded.hop_count, 1);
        assert_eq!(forwarded.bundle_id, b.bundle_id);
        assert_eq!(forwarded.calculate_bundle_id().unwrap(), b.bundle_id);
        assert_eq!(forwarded.canonical_json().unwrap(), b.canonical_json().unwrap());
    }

    #[test]
    fn well_formed_id_check() {
        let mut b = sample_bundle();
        assert!(b.has_well_formed_id());
        b.bundle_id = "sha256:abc".into();
        assert!(!b.has_well_formed_id());
        b.bundle_id = format!("{BUNDLE_ID_PREFIX}{}", "Z".repeat(64));
        assert!(!b.has_well_formed_id());
    }

    #[test]
    fn expiry_and_hop_checks() {
        let mut b = sample_bundle();
        assert!(!b.is_expired());
        assert!(b.is_expired_at(b.expires_at + Duration::seconds(1)));
        assert!(!b.is_hop_limit_reached());
        b.hop_count = b.hop_limit;
        assert!(b.is_hop_limit_reached());
    }

    proptest! {
        #[test]
        fn canonical_form_is_deterministic(
            note in "[a-z0-9 ]{0,32}",
            qty in 0u32..10_000,
            hops in 0u32..20,
        ) {
            let mut a = sample_bundle();
            a.payload.insert("note".into(), Value::String(note.clone()));
            a.payload.insert("qty".into(), Value::from(qty));
            a.hop_count = hops;

            // Rebuild the same logical content through a serde round trip.
            let b: Bundle = serde_json::from_str(&serde_json::to_string(&a).unwrap()).unwrap();
            prop_assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
            prop_assert_eq!(
                a.calculate_bundle_id().unwrap(),
                b.calculate_bundle_id().unwrap()
            );
        }
    }
}
