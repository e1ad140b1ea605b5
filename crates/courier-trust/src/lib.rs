// SPDX-License-Identifier: MIT OR Apache-2.0
//! Keyrings, trust levels, and audience access control.
//!
//! Four named keyrings — `public` (all known keys), `local` (same
//! community), `trusted` (vetted), `verified` (cryptographically
//! validated) — plus a per-key trust level. Persisted as one JSON
//! document; writes rewrite the whole file under a single lock and readers
//! work on snapshots, so the document never tears.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use courier_model::{Audience, Bundle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Trust score a peer needs before `trusted`-audience bundles flow to it.
pub const TRUSTED_FORWARD_THRESHOLD: f64 = 0.7;

/// Errors from trust store persistence.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Reading or writing the document failed.
    #[error("trust store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document on disk is not valid JSON.
    #[error("trust store parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-key trust level, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Never seen before.
    Unknown,
    /// Seen and recorded.
    Known,
    /// Explicitly vetted.
    Trusted,
    /// Cryptographically validated identity.
    Verified,
}

impl TrustLevel {
    /// Numeric encoding used in the persisted document (0–3).
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            TrustLevel::Unknown => 0,
            TrustLevel::Known => 1,
            TrustLevel::Trusted => 2,
            TrustLevel::Verified => 3,
        }
    }

    /// Decode the persisted numeric form; out-of-range values degrade to
    /// `Unknown`.
    #[must_use]
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TrustLevel::Known,
            2 => TrustLevel::Trusted,
            3 => TrustLevel::Verified,
            _ => TrustLevel::Unknown,
        }
    }
}

/// The four named keyrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keyring {
    /// All known public keys.
    Public,
    /// Same-community members.
    Local,
    /// Vetted entities.
    Trusted,
    /// Cryptographically validated identities.
    Verified,
}

impl Keyring {
    /// Every keyring.
    pub const ALL: [Keyring; 4] = [
        Keyring::Public,
        Keyring::Local,
        Keyring::Trusted,
        Keyring::Verified,
    ];

    /// Stable name used in the persisted document.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Keyring::Public => "public",
            Keyring::Local => "local",
            Keyring::Trusted => "trusted",
            Keyring::Verified => "verified",
        }
    }
}

impl fmt::Display for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an access or policy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the operation is allowed.
    pub allowed: bool,
    /// Stable explanation, mainly for denials.
    pub reason: Option<String>,
}

impl Decision {
    /// An allow decision with no annotation.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// An allow decision carrying its justification.
    #[must_use]
    pub fn allow_because(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.into()),
        }
    }

    /// A deny decision with its reason.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// The persisted document: `{ keyrings: {...}, trust_levels: {...} }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TrustDocument {
    #[serde(default)]
    keyrings: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    trust_levels: BTreeMap<String, u8>,
}

/// Point-in-time copy of the trust state for lock-free reads.
#[derive(Debug, Clone, Default)]
pub struct TrustSnapshot {
    keyrings: BTreeMap<String, BTreeSet<String>>,
    trust_levels: BTreeMap<String, u8>,
}

impl TrustSnapshot {
    /// Whether `public_key` sits in `keyring`.
    #[must_use]
    pub fn is_in_keyring(&self, public_key: &str, keyring: Keyring) -> bool {
        self.keyrings
            .get(keyring.as_str())
            .is_some_and(|keys| keys.contains(public_key))
    }

    /// Trust level for `public_key` (`Unknown` when absent).
    #[must_use]
    pub fn trust_level(&self, public_key: &str) -> TrustLevel {
        self.trust_levels
            .get(public_key)
            .copied()
            .map_or(TrustLevel::Unknown, TrustLevel::from_u8)
    }
}

/// Aggregate statistics over the trust store.
#[derive(Debug, Clone, Serialize)]
pub struct TrustStats {
    /// Keys per keyring.
    pub keyrings: BTreeMap<String, usize>,
    /// Total keys with a recorded trust level.
    pub total_known_keys: usize,
    /// Keys per trust level name.
    pub trust_distribution: BTreeMap<String, usize>,
}

/// The persistent trust store.
pub struct TrustStore {
    path: PathBuf,
    inner: Mutex<TrustDocument>,
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TrustStore {
    /// Load the store from `path`, starting fresh if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError`] when the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, TrustError> {
        let document = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let document: TrustDocument = serde_json::from_str(&raw)?;
            info!(
                path = %path.display(),
                keys = document.trust_levels.len(),
                "loaded trust store"
            );
            document
        } else {
            debug!(path = %path.display(), "no trust store on disk, starting fresh");
            TrustDocument::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(document),
        })
    }

    /// Add a key to a keyring (and to `public`, which tracks every known
    /// key), recording its trust level, then persist.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError`] if the rewrite fails.
    pub async fn add_key(
        &self,
        public_key: &str,
        keyring: Keyring,
        level: TrustLevel,
    ) -> Result<(), TrustError> {
        let mut doc = self.inner.lock().await;
        doc.keyrings
            .entry(Keyring::Public.as_str().to_string())
            .or_default()
            .insert(public_key.to_string());
        doc.keyrings
            .entry(keyring.as_str().to_string())
            .or_default()
            .insert(public_key.to_string());
        doc.trust_levels
            .insert(public_key.to_string(), level.as_u8());
        self.persist(&doc)?;
        debug!(keyring = %keyring, level = level.as_u8(), "added key to keyring");
        Ok(())
    }

    /// Remove a key from one keyring (its trust level survives), then
    /// persist.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError`] if the rewrite fails.
    pub async fn remove_key(&self, public_key: &str, keyring: Keyring) -> Result<(), TrustError> {
        let mut doc = self.inner.lock().await;
        if let Some(keys) = doc.keyrings.get_mut(keyring.as_str()) {
            keys.remove(public_key);
        }
        self.persist(&doc)?;
        Ok(())
    }

    /// Current trust level for a key.
    pub async fn trust_level(&self, public_key: &str) -> TrustLevel {
        self.snapshot().await.trust_level(public_key)
    }

    /// Whether a key sits in a keyring.
    pub async fn is_in_keyring(&self, public_key: &str, keyring: Keyring) -> bool {
        self.snapshot().await.is_in_keyring(public_key, keyring)
    }

    /// Copy of the current state for lock-free evaluation.
    pub async fn snapshot(&self) -> TrustSnapshot {
        let doc = self.inner.lock().await;
        TrustSnapshot {
            keyrings: doc.keyrings.clone(),
            trust_levels: doc.trust_levels.clone(),
        }
    }

    /// May `requester` read this bundle, per its audience?
    pub async fn can_access_bundle(&self, bundle: &Bundle, requester: &str) -> Decision {
        let snapshot = self.snapshot().await;
        can_access(&snapshot, bundle, requester)
    }

    /// Keep only the bundles `requester` may read.
    pub async fn filter_accessible(&self, bundles: Vec<Bundle>, requester: &str) -> Vec<Bundle> {
        let snapshot = self.snapshot().await;
        let before = bundles.len();
        let accessible: Vec<Bundle> = bundles
            .into_iter()
            .filter(|b| can_access(&snapshot, b, requester).allowed)
            .collect();
        let denied = before - accessible.len();
        if denied > 0 {
            debug!(denied, "filtered bundles by audience access");
        }
        accessible
    }

    /// May `author` create a bundle with this audience?
    ///
    /// Only `local`/`trusted` members may author `trusted` bundles; only
    /// `verified` members may author `private` ones.
    pub async fn enforce_creation_policy(&self, audience: Audience, author: &str) -> Decision {
        let snapshot = self.snapshot().await;
        let level = snapshot.trust_level(author);
        match audience {
            Audience::Public | Audience::Local => Decision::allow(),
            Audience::Trusted => {
                if snapshot.is_in_keyring(author, Keyring::Local)
                    || snapshot.is_in_keyring(author, Keyring::Trusted)
                    || level >= TrustLevel::Trusted
                {
                    Decision::allow()
                } else {
                    Decision::deny("Insufficient trust to create trusted bundles")
                }
            }
            Audience::Private => {
                if snapshot.is_in_keyring(author, Keyring::Verified)
                    || level >= TrustLevel::Verified
                {
                    Decision::allow()
                } else {
                    Decision::deny("Must be verified to create private bundles")
                }
            }
        }
    }

    /// Export one keyring for sharing with another community.
    pub async fn export_keyring(&self, keyring: Keyring) -> Vec<String> {
        let doc = self.inner.lock().await;
        doc.keyrings
            .get(keyring.as_str())
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Import previously unseen keys into `public` at level `Known`.
    /// Returns how many were new.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError`] if the rewrite fails.
    pub async fn import_keyring(&self, members: &[String]) -> Result<usize, TrustError> {
        let mut doc = self.inner.lock().await;
        let mut imported = 0usize;
        for key in members {
            if doc.trust_levels.contains_key(key) {
                continue;
            }
            doc.keyrings
                .entry(Keyring::Public.as_str().to_string())
                .or_default()
                .insert(key.clone());
            doc.trust_levels
                .insert(key.clone(), TrustLevel::Known.as_u8());
            imported += 1;
        }
        if imported > 0 {
            self.persist(&doc)?;
            info!(imported, "imported community keyring");
        }
        Ok(imported)
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> TrustStats {
        let doc = self.inner.lock().await;
        let mut keyrings = BTreeMap::new();
        for ring in Keyring::ALL {
            keyrings.insert(
                ring.as_str().to_string(),
                doc.keyrings.get(ring.as_str()).map_or(0, BTreeSet::len),
            );
        }
        let mut trust_distribution = BTreeMap::new();
        for name in ["unknown", "known", "trusted", "verified"] {
            trust_distribution.insert(name.to_string(), 0usize);
        }
        for raw in doc.trust_levels.values() {
            let name = match TrustLevel::from_u8(*raw) {
                TrustLevel::Unknown => "unknown",
                TrustLevel::Known => "known",
                TrustLevel::Trusted => "trusted",
                TrustLevel::Verified => "verified",
            };
            *trust_distribution.entry(name.to_string()).or_insert(0) += 1;
        }
        TrustStats {
            keyrings,
            total_known_keys: doc.trust_levels.len(),
            trust_distribution,
        }
    }

    fn persist(&self, doc: &TrustDocument) -> Result<(), TrustError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        if let Err(e) = std::fs::write(&self.path, &json) {
            warn!(path = %self.path.display(), error = %e, "failed to persist trust store");
            return Err(e.into());
        }
        Ok(())
    }
}

/// Audience access over a snapshot. The author always reads their own
/// bundles; `public` is open; the rest follow keyring membership with a
/// trust-level fallback.
fn can_access(snapshot: &TrustSnapshot, bundle: &Bundle, requester: &str) -> Decision {
    if bundle.audience == Audience::Public {
        return Decision::allow_because("Public audience");
    }
    if requester == bundle.author_public_key {
        return Decision::allow_because("Bundle author");
    }
    let level = snapshot.trust_level(requester);
    match bundle.audience {
        Audience::Public => Decision::allow(),
        Audience::Local => {
            if snapshot.is_in_keyring(requester, Keyring::Local) {
                Decision::allow_because("Local community member")
            } else {
                Decision::deny("Not a local community member")
            }
        }
        Audience::Trusted => {
            if snapshot.is_in_keyring(requester, Keyring::Trusted)
                || snapshot.is_in_keyring(requester, Keyring::Verified)
                || level >= TrustLevel::Trusted
            {
                Decision::allow_because("Trusted")
            } else {
                Decision::deny("Not trusted")
            }
        }
        Audience::Private => {
            if snapshot.is_in_keyring(requester, Keyring::Verified)
                || level >= TrustLevel::Verified
            {
                Decision::allow_because("Verified")
            } else {
                Decision::deny("Insufficient trust for private bundle")
            }
        }
    }
}
