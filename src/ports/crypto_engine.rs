//! Cryptographic engine port: the native homomorphic-encryption library.
//!
//! Key generation, decryption and DP correction live behind this trait. Every
//! operation reports failure through `CryptoError`; an engine must never
//! return an empty value in place of an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{CryptoContext, CryptoError, NoiseMetadata, PublicKey};

/// Unbiased point estimates for one variable after DP correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectedStatistic {
    pub mean: f64,
    pub variance: f64,
}

/// Confidence bounds for one variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableBounds {
    pub mean: (f64, f64),
    pub variance: (f64, f64),
}

/// Trait for the cryptographic engine.
///
/// Implementations provide:
/// - Ephemeral context creation from scheme parameters
/// - Public key derivation for key switching
/// - Decryption of numeric tables and statistics payloads
/// - DP bias/variance correction and confidence intervals
pub trait CryptoEngine: Send + Sync {
    /// Create a fresh context (holding a new private key) from base64 scheme
    /// parameters.
    ///
    /// # Errors
    /// Returns `CryptoError::InvalidParameters` or `CryptoError::Context`.
    fn new_context(&self, scheme_params_b64: &str) -> Result<CryptoContext, CryptoError>;

    /// Derive the public key matching the context's private key.
    ///
    /// # Errors
    /// Returns `CryptoError::PublicKey` if derivation fails.
    fn public_key(&self, context: &CryptoContext) -> Result<PublicKey, CryptoError>;

    /// Decrypt a ciphertext into rows of floats.
    ///
    /// # Errors
    /// Returns `CryptoError::Decryption` if decryption fails.
    fn decrypt_numeric_table(
        &self,
        context: &CryptoContext,
        ciphertext: &[u8],
    ) -> Result<Vec<Vec<f64>>, CryptoError>;

    /// Decrypt a statistics ciphertext into its JSON list of per-variable records.
    ///
    /// # Errors
    /// Returns `CryptoError::Decryption` if decryption fails.
    fn decrypt_statistics(
        &self,
        context: &CryptoContext,
        ciphertext: &[u8],
    ) -> Result<String, CryptoError>;

    /// Correct a raw row of DP-noised aggregates into per-variable estimates.
    ///
    /// # Errors
    /// Returns `CryptoError::Statistics` if the row is malformed.
    fn correct_statistics(&self, raw_row: &[f64]) -> Result<Vec<CorrectedStatistic>, CryptoError>;

    /// Compute per-variable confidence bounds for a raw row of aggregates.
    ///
    /// # Errors
    /// Returns `CryptoError::Statistics` if the row or noise metadata is malformed.
    fn confidence_interval(
        &self,
        raw_row: &[f64],
        noise: &[NoiseMetadata],
    ) -> Result<Vec<VariableBounds>, CryptoError>;

    /// Release any engine-side state tied to the context.
    ///
    /// Called exactly once per context, right before it is dropped.
    fn discard_context(&self, _context: &CryptoContext) {}
}

/// Shared handle to a configured engine.
///
/// Components that need the engine receive one at construction; there is no
/// process-wide "engine loaded" state.
pub struct CryptoEngineHandle<E: CryptoEngine + ?Sized> {
    engine: Arc<E>,
}

impl<E: CryptoEngine + ?Sized> CryptoEngineHandle<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }
}

impl<E: CryptoEngine + ?Sized> Clone for CryptoEngineHandle<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: CryptoEngine + ?Sized> std::ops::Deref for CryptoEngineHandle<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.engine
    }
}
