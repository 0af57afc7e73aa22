//! Result collector: resolves every result reference of a successful job.
//!
//! Collection is all-or-nothing: if any reference fails to resolve, no
//! descriptors are returned.

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::{ArtifactDescriptor, TerminalJob};
use crate::ports::ComputationService;
use crate::{CipherflowError, Result};

pub struct ResultCollector<S: ComputationService + ?Sized> {
    service: Arc<S>,
}

impl<S: ComputationService + ?Sized> ResultCollector<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// Resolve the job's result references into artifact descriptors, in
    /// server order, each reference exactly once.
    ///
    /// # Errors
    /// - `ResultCollection` if a reference cannot be resolved
    /// - `ProtocolViolation` if the service answers with a descriptor for a
    ///   different reference
    pub fn collect(&self, job: &TerminalJob) -> Result<Vec<ArtifactDescriptor>> {
        let mut seen = HashSet::with_capacity(job.results.len());
        let mut descriptors = Vec::with_capacity(job.results.len());

        for reference in &job.results {
            if !seen.insert(reference) {
                tracing::warn!(
                    "Job {} lists result {} more than once, ignoring duplicate",
                    job.handle,
                    reference
                );
                continue;
            }

            let descriptor = self
                .service
                .fetch_artifact_descriptor(reference)
                .map_err(|e| CipherflowError::ResultCollection {
                    job: job.handle.id.clone(),
                    result: reference.to_string(),
                    source: e,
                })?;

            if descriptor.reference != *reference {
                return Err(CipherflowError::ProtocolViolation {
                    context: format!("job {}", job.handle),
                    message: format!(
                        "requested result {} but received descriptor for {}",
                        reference, descriptor.reference
                    ),
                });
            }

            tracing::debug!(
                "Resolved result {} ({}, {})",
                reference,
                descriptor.content_type,
                if descriptor.is_encrypted() { "encrypted" } else { "plaintext" }
            );
            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }
}
