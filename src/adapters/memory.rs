//! In-memory computation service.
//!
//! Serves scripted status reports, descriptors, payloads and releases, and
//! records every request it receives. Used for local dry runs and as the
//! service double in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::domain::{
    ArtifactDescriptor, ContentType, JobDefinition, JobHandle, JobStatus, PublicKey,
    ReleasedArtifact, ResultReference, StatusReport,
};
use crate::ports::{ComputationService, ServiceError};

#[derive(Default)]
struct State {
    statuses: VecDeque<Result<StatusReport, ServiceError>>,
    stuck_at: Option<JobStatus>,
    status_reads: u32,
    submissions: Vec<JobDefinition>,
    submit_failure: Option<ServiceError>,
    descriptors: HashMap<ResultReference, ArtifactDescriptor>,
    raw: HashMap<ResultReference, Vec<u8>>,
    raw_fetches: u32,
    releases: HashMap<ResultReference, ReleasedArtifact>,
    release_failure: Option<ServiceError>,
    released_keys: Vec<PublicKey>,
}

/// Scripted `ComputationService` kept entirely in memory.
///
/// Status reports are served in order; the last one is repeated once the
/// script runs out.
#[derive(Default)]
pub struct InMemoryComputationService {
    state: Mutex<State>,
}

impl InMemoryComputationService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A service answering status reads from `script`.
    #[must_use]
    pub fn with_statuses(script: Vec<Result<StatusReport, ServiceError>>) -> Self {
        let service = Self::default();
        service.lock().statuses = script.into();
        service
    }

    /// A service whose jobs stay in `status` forever.
    #[must_use]
    pub fn never_terminal(status: JobStatus) -> Self {
        let service = Self::default();
        service.lock().stuck_at = Some(status);
        service
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the others.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Serve `descriptor` under its own reference.
    pub fn add_descriptor(&self, descriptor: ArtifactDescriptor) {
        let reference = descriptor.reference.clone();
        self.add_descriptor_for(reference, descriptor);
    }

    /// Serve `descriptor` when `reference` is requested, whatever it names.
    pub fn add_descriptor_for(&self, reference: ResultReference, descriptor: ArtifactDescriptor) {
        self.lock().descriptors.insert(reference, descriptor);
    }

    pub fn add_raw(&self, reference: ResultReference, payload: Vec<u8>) {
        self.lock().raw.insert(reference, payload);
    }

    /// Answer a release of `reference` with an encrypted payload.
    pub fn add_release(&self, reference: ResultReference, ciphertext: Vec<u8>) {
        self.add_release_with_type(reference, ContentType::Encrypted, ciphertext);
    }

    pub fn add_release_with_type(
        &self,
        reference: ResultReference,
        content_type: ContentType,
        payload: Vec<u8>,
    ) {
        self.lock()
            .releases
            .insert(reference, ReleasedArtifact::new(content_type, payload));
    }

    /// Reject every subsequent submission with `error`. Submissions are still
    /// recorded.
    pub fn fail_submit(&self, error: ServiceError) {
        self.lock().submit_failure = Some(error);
    }

    /// Fail every subsequent release with `error`.
    pub fn fail_release(&self, error: ServiceError) {
        self.lock().release_failure = Some(error);
    }

    #[must_use]
    pub fn status_reads(&self) -> u32 {
        self.lock().status_reads
    }

    #[must_use]
    pub fn submissions(&self) -> Vec<JobDefinition> {
        self.lock().submissions.clone()
    }

    #[must_use]
    pub fn raw_fetches(&self) -> u32 {
        self.lock().raw_fetches
    }

    /// Public keys received by release requests, in order.
    #[must_use]
    pub fn released_keys(&self) -> Vec<PublicKey> {
        self.lock().released_keys.clone()
    }

    #[must_use]
    pub fn release_calls(&self) -> usize {
        self.lock().released_keys.len()
    }
}

impl ComputationService for InMemoryComputationService {
    fn submit(&self, definition: &JobDefinition) -> Result<JobHandle, ServiceError> {
        let mut state = self.lock();
        state.submissions.push(definition.clone());
        if let Some(error) = &state.submit_failure {
            return Err(error.clone());
        }
        Ok(JobHandle::new(format!("job-{}", state.submissions.len())))
    }

    fn get_status(&self, handle: &JobHandle) -> Result<StatusReport, ServiceError> {
        let mut state = self.lock();
        state.status_reads += 1;

        if let Some(status) = state.stuck_at {
            return Ok(StatusReport::new(status));
        }
        if state.statuses.len() > 1 {
            if let Some(next) = state.statuses.pop_front() {
                return next;
            }
        }
        state
            .statuses
            .front()
            .cloned()
            .unwrap_or_else(|| Err(ServiceError::NotFound(handle.id.clone())))
    }

    fn fetch_artifact_descriptor(
        &self,
        reference: &ResultReference,
    ) -> Result<ArtifactDescriptor, ServiceError> {
        self.lock()
            .descriptors
            .get(reference)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(reference.to_string()))
    }

    fn release(
        &self,
        reference: &ResultReference,
        public_key: &PublicKey,
    ) -> Result<ReleasedArtifact, ServiceError> {
        let mut state = self.lock();
        state.released_keys.push(public_key.clone());
        if let Some(error) = &state.release_failure {
            return Err(error.clone());
        }
        state
            .releases
            .get(reference)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(reference.to_string()))
    }

    fn fetch_raw_bytes(&self, reference: &ResultReference) -> Result<Vec<u8>, ServiceError> {
        let mut state = self.lock();
        state.raw_fetches += 1;
        state
            .raw
            .get(reference)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(reference.to_string()))
    }
}
