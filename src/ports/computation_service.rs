//! Remote computation service port.
//!
//! This trait abstracts the REST API of the computation service from the
//! pipeline logic. Status reads must be idempotent.

use crate::domain::{
    ArtifactDescriptor, JobDefinition, JobHandle, PublicKey, ReleasedArtifact, ResultReference,
    StatusReport,
};

/// Errors reported by a `ComputationService` implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// Network failure, timeout, or a temporary server-side fault
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Whether the failure may clear up on its own (the next poll retries it).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Trait for the remote computation service.
pub trait ComputationService: Send + Sync {
    /// Submit a job.
    ///
    /// # Errors
    /// Returns `ServiceError::Rejected` if the service refuses the definition.
    fn submit(&self, definition: &JobDefinition) -> Result<JobHandle, ServiceError>;

    /// Read the current status of a job.
    ///
    /// # Errors
    /// Returns `ServiceError::Transport` on transient failures.
    fn get_status(&self, handle: &JobHandle) -> Result<StatusReport, ServiceError>;

    /// Resolve a result reference into its artifact descriptor.
    ///
    /// # Errors
    /// Returns `ServiceError::NotFound` if the reference is unknown.
    fn fetch_artifact_descriptor(
        &self,
        reference: &ResultReference,
    ) -> Result<ArtifactDescriptor, ServiceError>;

    /// Ask the service to key-switch a result to `public_key`.
    ///
    /// # Errors
    /// Returns error if the release request fails.
    fn release(
        &self,
        reference: &ResultReference,
        public_key: &PublicKey,
    ) -> Result<ReleasedArtifact, ServiceError>;

    /// Fetch the raw payload of a result that is not encrypted.
    ///
    /// # Errors
    /// Returns error if the payload cannot be fetched.
    fn fetch_raw_bytes(&self, reference: &ResultReference) -> Result<Vec<u8>, ServiceError>;
}
