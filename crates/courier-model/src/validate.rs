// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable validation-failure vocabulary.
//!
//! Callers and tests match on these display strings, so they must not
//! change across releases.

use thiserror::Error;

/// Reasons a received bundle fails validation and lands in quarantine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The signature does not verify against the author's public key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The recomputed content address disagrees with the claimed one.
    #[error("BundleId mismatch: expected {expected}, got {got}")]
    BundleIdMismatch {
        /// Address recomputed from the canonical form.
        expected: String,
        /// Address the bundle arrived with.
        got: String,
    },

    /// The bundle is past its expiry.
    #[error("Bundle expired")]
    Expired,

    /// The bundle has used up its hop budget.
    #[error("Hop limit exceeded")]
    HopLimitExceeded,

    /// The expiry does not come after the creation instant.
    #[error("Bundle expiry precedes creation")]
    ExpiryBeforeCreation,

    /// The claimed address is not `b:sha256:` + 64 lowercase hex chars.
    #[error("Malformed bundleId")]
    MalformedBundleId,
}
