// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical timestamp handling.
//!
//! Every timestamp that participates in signing or addressing is rendered
//! as ISO-8601 UTC with exactly microsecond precision and a `Z` suffix,
//! e.g. `2026-03-01T12:34:56.000123Z`. Identical logical content must
//! produce bit-identical bytes on every platform, so the format is fixed
//! rather than delegated to chrono's default RFC 3339 rendering.

use chrono::{DateTime, Duration, DurationRound, Utc};

/// strftime pattern for the canonical timestamp rendering.
pub const CANONICAL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Current UTC time truncated to microsecond precision.
///
/// Truncation keeps in-memory bundles equal to their wire round-trips; the
/// canonical format cannot represent anything finer.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(Duration::microseconds(1)).unwrap_or(now)
}

/// Render a timestamp in the canonical format.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(CANONICAL_TIME_FORMAT).to_string()
}

/// Parse a canonical (or any RFC 3339) timestamp back to UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// `#[serde(with = "canonical_time")]` adapter for bundle timestamps.
pub mod canonical_time {
    use super::{format_timestamp, parse_timestamp};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as the canonical fixed-precision string.
    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_timestamp(ts))
    }

    /// Deserialize from any RFC 3339 rendering, normalizing to UTC.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
