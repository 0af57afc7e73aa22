//! Key-switch negotiator: releases one result under a fresh ephemeral key.
//!
//! # Key Memory Security
//!
//! Every encrypted result gets its own `EphemeralKeyPair`. Only the public key
//! leaves the process. The private context is owned by the guard, handed to the
//! engine once through `discard_context` when the guard drops, and then zeroized.
//! Dropping happens on every exit path, including decode failures and unwinding.

use std::sync::Arc;

use crate::domain::{
    ArtifactDescriptor, ContentType, CryptoContext, CryptoError, JobHandle, PublicKey,
    ReleasedArtifact, ResultReference,
};
use crate::ports::{ComputationService, CryptoEngine, CryptoEngineHandle};
use crate::{CipherflowError, Result};

use super::dispatcher::{unsupported, DecodeRoutine};

/// Single-use key pair scoped to one result's release-and-decrypt cycle.
pub struct EphemeralKeyPair<'e, E: CryptoEngine + ?Sized> {
    engine: &'e E,
    context: CryptoContext,
    public_key: PublicKey,
    result: ResultReference,
}

impl<'e, E: CryptoEngine + ?Sized> EphemeralKeyPair<'e, E> {
    /// Build a fresh context from the scheme parameters and derive its public key.
    ///
    /// # Errors
    /// Returns the engine's `CryptoError`; a context created before the failure
    /// is discarded.
    pub fn generate(
        engine: &'e E,
        scheme_params_b64: &str,
        result: &ResultReference,
    ) -> std::result::Result<Self, CryptoError> {
        let context = engine.new_context(scheme_params_b64)?;
        let public_key = match engine.public_key(&context) {
            Ok(pk) => pk,
            Err(e) => {
                engine.discard_context(&context);
                return Err(e);
            }
        };

        tracing::debug!(
            "Generated ephemeral key for result {} (public key {})",
            result,
            public_key.fingerprint
        );

        Ok(Self {
            engine,
            context,
            public_key,
            result: result.clone(),
        })
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    #[must_use]
    pub fn context(&self) -> &CryptoContext {
        &self.context
    }
}

impl<E: CryptoEngine + ?Sized> Drop for EphemeralKeyPair<'_, E> {
    fn drop(&mut self) {
        self.engine.discard_context(&self.context);
        tracing::trace!("Discarded ephemeral key for result {}", self.result);
        // `context` zeroizes itself when the fields drop.
    }
}

impl<E: CryptoEngine + ?Sized> std::fmt::Debug for EphemeralKeyPair<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("result", &self.result)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Outcome of a release: either the plaintext payload, or a key-switched
/// ciphertext together with the only key able to decrypt it.
pub enum Released<'e, E: CryptoEngine + ?Sized> {
    Plaintext(Vec<u8>),
    Encrypted {
        artifact: ReleasedArtifact,
        keys: EphemeralKeyPair<'e, E>,
    },
}

impl<E: CryptoEngine + ?Sized> std::fmt::Debug for Released<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plaintext(bytes) => f
                .debug_tuple("Plaintext")
                .field(&format_args!("{} bytes", bytes.len()))
                .finish(),
            Self::Encrypted { artifact, keys } => f
                .debug_struct("Encrypted")
                .field("artifact", artifact)
                .field("keys", keys)
                .finish(),
        }
    }
}

pub struct KeySwitchNegotiator<S, E>
where
    S: ComputationService + ?Sized,
    E: CryptoEngine + ?Sized,
{
    service: Arc<S>,
    engine: CryptoEngineHandle<E>,
}

impl<S, E> KeySwitchNegotiator<S, E>
where
    S: ComputationService + ?Sized,
    E: CryptoEngine + ?Sized,
{
    pub fn new(service: Arc<S>, engine: CryptoEngineHandle<E>) -> Self {
        Self { service, engine }
    }

    /// Release one result.
    ///
    /// Plaintext artifacts (no switching parameters) are fetched as-is without
    /// touching the engine. Encrypted artifacts are key-switched to a freshly
    /// generated public key, provided their content type can be decoded.
    ///
    /// # Errors
    /// - `ResultFetch` if a plaintext payload cannot be fetched
    /// - `UnsupportedContentType` if an encrypted artifact has no decode
    ///   routine (no key is generated and nothing is released)
    /// - `Crypto` if the engine cannot build the ephemeral key pair
    /// - `KeySwitch` if the release request fails (not retried)
    /// - `ProtocolViolation` if the service answers with a non-encrypted payload
    pub fn release(
        &self,
        job: &JobHandle,
        descriptor: &ArtifactDescriptor,
    ) -> Result<Released<'_, E>> {
        let reference = &descriptor.reference;

        let Some(switching_params) = descriptor.switching_params.as_deref() else {
            tracing::debug!("Result {} is plaintext, no key switch needed", reference);
            let bytes = self.service.fetch_raw_bytes(reference).map_err(|e| {
                CipherflowError::ResultFetch {
                    job: job.id.clone(),
                    result: reference.to_string(),
                    source: e,
                }
            })?;
            return Ok(Released::Plaintext(bytes));
        };

        if DecodeRoutine::for_content_type(&descriptor.content_type).is_none() {
            return Err(unsupported(job, descriptor));
        }

        let keys = EphemeralKeyPair::generate(self.engine.engine(), switching_params, reference)
            .map_err(|e| CipherflowError::Crypto {
                job: job.id.clone(),
                result: reference.to_string(),
                source: e,
            })?;

        let artifact = self
            .service
            .release(reference, keys.public_key())
            .map_err(|e| {
                tracing::warn!("Release of result {} failed: {}", reference, e);
                CipherflowError::KeySwitch {
                    job: job.id.clone(),
                    result: reference.to_string(),
                    source: e,
                }
            })?;

        if artifact.content_type != ContentType::Encrypted {
            return Err(CipherflowError::ProtocolViolation {
                context: format!("job {job}, result {reference}"),
                message: format!(
                    "release returned '{}' content where an encrypted payload was expected",
                    artifact.content_type
                ),
            });
        }

        tracing::debug!(
            "Result {} key-switched ({} bytes)",
            reference,
            artifact.ciphertext.len()
        );
        Ok(Released::Encrypted { artifact, keys })
    }
}
