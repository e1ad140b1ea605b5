// SPDX-License-Identifier: MIT OR Apache-2.0
//! Default TTL derivation.

use crate::vocab::Priority;
use chrono::{DateTime, Duration, Utc};

/// Default expiry for a bundle whose caller supplied neither an explicit
/// expiry nor a TTL. Conditions are checked in order; the first match wins.
///
/// | condition | TTL |
/// |---|---|
/// | priority `emergency` | 12 h |
/// | priority `perishable` | 48 h |
/// | tag `food` / `perishable` | 48 h |
/// | tag `index` | 3 d |
/// | topic `knowledge` / `education` | 270 d |
/// | topic `mutual-aid` | 48 h |
/// | topic `coordination` | 7 d |
/// | topic `inventory` | 30 d |
/// | priority `normal` | 7 d |
/// | priority `low` | 3 d |
#[must_use]
pub fn default_expiry(
    priority: Priority,
    topic: &str,
    tags: &[String],
    created_at: DateTime<Utc>,
) -> DateTime<Utc> {
    if priority == Priority::Emergency {
        return created_at + Duration::hours(12);
    }
    if priority == Priority::Perishable {
        return created_at + Duration::hours(48);
    }

    let has_tag = |wanted: &str| tags.iter().any(|t| t.eq_ignore_ascii_case(wanted));
    if has_tag("food") || has_tag("perishable") {
        return created_at + Duration::hours(48);
    }
    if has_tag("index") {
        return created_at + Duration::days(3);
    }

    match topic {
        "knowledge" | "education" => return created_at + Duration::days(270),
        "mutual-aid" => return created_at + Duration::hours(48),
        "coordination" => return created_at + Duration::days(7),
        "inventory" => return created_at + Duration::days(30),
        _ => {}
    }

    match priority {
        Priority::Normal => created_at + Duration::days(7),
        Priority::Low => created_at + Duration::days(3),
        // Unreachable: handled above; keep the fallback total.
        Priority::Emergency | Priority::Perishable => created_at + Duration::days(7),
    }
}
