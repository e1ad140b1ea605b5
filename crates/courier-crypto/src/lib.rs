// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node Ed25519 keypair lifecycle, signing, and verification.
//!
//! The node keypair is generated on first start and persisted as PEM
//! artifacts: PKCS#8 for the private key (owner-only permissions) and SPKI
//! for the public key. Key material never leaves the process in any other
//! form. Verification failure is non-exceptional — it returns `false`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the persisted private key.
pub const PRIVATE_KEY_FILE: &str = "node_private.pem";
/// File name of the persisted public key.
pub const PUBLIC_KEY_FILE: &str = "node_public.pem";

/// Errors from key generation, persistence, or loading.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Reading or writing a key file failed.
    #[error("key file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A PEM artifact could not be encoded or decoded.
    #[error("key encoding error: {0}")]
    Encoding(String),
}

/// The node's Ed25519 identity.
///
/// Read-only after construction; one-time generation is serialized by the
/// existence of the key files on disk.
pub struct NodeKeys {
    signing: SigningKey,
    public_pem: String,
    fingerprint: String,
}

impl std::fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print private key material.
        f.debug_struct("NodeKeys")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl NodeKeys {
    /// Load the keypair from `keys_dir`, generating and persisting a fresh
    /// one if the files do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if the directory cannot be created, the files
    /// cannot be read or written, or an existing artifact fails to decode.
    pub fn load_or_generate(keys_dir: &Path) -> Result<Self, CryptoError> {
        fs::create_dir_all(keys_dir)?;
        let private_path = keys_dir.join(PRIVATE_KEY_FILE);
        let public_path = keys_dir.join(PUBLIC_KEY_FILE);

        if private_path.exists() && public_path.exists() {
            Self::load(&private_path, &public_path)
        } else {
            Self::generate(&private_path, &public_path)
        }
    }

    fn generate(private_path: &PathBuf, public_path: &PathBuf) -> Result<Self, CryptoError> {
        let signing = SigningKey::generate(&mut OsRng);

        let private_pem = signing
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        fs::write(private_path, private_pem.as_bytes())?;
        restrict_permissions(private_path, 0o600)?;

        let public_pem = signing
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        fs::write(public_path, public_pem.as_bytes())?;
        restrict_permissions(public_path, 0o644)?;

        let keys = Self::assemble(signing, public_pem);
        info!(fingerprint = %keys.fingerprint, "generated node keypair");
        Ok(keys)
    }

    fn load(private_path: &Path, public_path: &Path) -> Result<Self, CryptoError> {
        let private_pem = fs::read_to_string(private_path)?;
        let signing = SigningKey::from_pkcs8_pem(&private_pem)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let public_pem = fs::read_to_string(public_path)?;
        Ok(Self::assemble(signing, public_pem))
    }

    fn assemble(signing: SigningKey, public_pem: String) -> Self {
        let fingerprint = fingerprint_of(&public_pem);
        Self {
            signing,
            public_pem,
            fingerprint,
        }
    }

    /// Sign `data` and return the base64 (standard alphabet) signature.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> String {
        let signature: Signature = self.signing.sign(data);
        BASE64.encode(signature.to_bytes())
    }

    /// The node's public key as an SPKI PEM string.
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// Stable 16-hex-char fingerprint of the node's public key.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Verify a base64 signature over `data` with a PEM-encoded public key.
///
/// Any failure — undecodable key, undecodable signature, or a signature
/// that does not verify — yields `false`.
#[must_use]
pub fn verify(data: &[u8], signature_b64: &str, public_key_pem: &str) -> bool {
    let Ok(key) = VerifyingKey::from_public_key_pem(public_key_pem) else {
        return false;
    };
    let Ok(sig_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(data, &signature).is_ok()
}

/// 16-hex-char fingerprint: SHA-256 of the public-key PEM, truncated.
#[must_use]
pub fn fingerprint_of(public_key_pem: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key_pem.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
