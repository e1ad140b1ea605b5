// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bundle data model, canonical serialization, and content addressing.
//!
//! A *bundle* is the immutable, signed, content-addressed unit everything
//! else in the courier moves around. This crate defines the bundle itself,
//! the classification vocabularies (priority, audience, receipt policy,
//! queue), the canonical JSON form used for both signing and addressing,
//! and the default-TTL rules applied when a caller does not pick an expiry.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod draft;
mod timefmt;
mod ttl;
mod validate;
mod vocab;

pub use bundle::{BUNDLE_ID_PREFIX, Bundle};
pub use draft::BundleDraft;
pub use timefmt::{CANONICAL_TIME_FORMAT, now_utc, parse_timestamp};
pub use ttl::default_expiry;
pub use validate::ValidationError;
pub use vocab::{Audience, Priority, QueueName, ReceiptPolicy};

/// Serialization module for canonical timestamps, usable in `#[serde(with)]`.
pub use timefmt::canonical_time;
