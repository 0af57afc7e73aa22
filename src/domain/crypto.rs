//! Key material exchanged with the cryptographic engine.
//!
//! # Memory Security
//!
//! `CryptoContext` holds private key material. It implements `ZeroizeOnDrop`,
//! is deliberately not `Clone`, and its `Debug` output never contains key bytes.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Error type for cryptographic engine operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Context creation failed: {0}")]
    Context(String),

    #[error("Public key derivation failed: {0}")]
    PublicKey(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Statistics correction failed: {0}")]
    Statistics(String),

    #[error("Invalid scheme parameters: {0}")]
    InvalidParameters(String),
}

/// Engine context holding the private key for one result release.
///
/// The bytes are opaque to this crate: a serialized secret key, or a native
/// handle, depending on the engine.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CryptoContext {
    inner: Vec<u8>,

    /// Identifier derived from the bytes (NOT secret)
    #[zeroize(skip)]
    pub fingerprint: String,
}

impl CryptoContext {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let fingerprint = compute_fingerprint(&bytes);
        Self {
            inner: bytes,
            fingerprint,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext")
            .field("fingerprint", &self.fingerprint)
            .field("size_bytes", &self.inner.len())
            .finish()
    }
}

/// Public half of an ephemeral key pair, sent to the service for key switching.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: Vec<u8>,
    pub fingerprint: String,
}

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let fingerprint = compute_fingerprint(&bytes);
        Self {
            inner: bytes,
            fingerprint,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("fingerprint", &self.fingerprint)
            .field("size_bytes", &self.inner.len())
            .finish()
    }
}

/// Short SHA-256 based identifier, safe to log.
fn compute_fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(bytes);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
