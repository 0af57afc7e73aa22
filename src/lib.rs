//! # Cipherflow
//!
//! Client-side orchestration of privacy-preserving computations.
//!
//! This crate provides:
//! - Job submission and status polling with bounded exponential backoff
//! - Collection of result artifacts for successful jobs
//! - Per-result key switching under a single-use ephemeral key pair
//! - Decryption dispatched on the declared content type
//! - Differential privacy post-correction of decrypted statistics
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types (jobs, artifacts, key material)
//! - `ports`: Trait definitions for external operations (service, engine, clock)
//! - `adapters`: Concrete implementations (HTTP service, in-memory service, system clock)
//! - `application`: The pipeline (poller, collector, negotiator, dispatcher, post-processor)
//! - `config`: Client configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

#[cfg(test)]
pub(crate) mod test_support;

use std::time::Duration;

pub use application::{CancellationFlag, ComputationRunner, JobOutcome, ResultOutcome};
pub use config::{ClientConfig, PollSettings};
pub use domain::{DecryptedArtifact, JobDefinition, JobStatus};

use domain::{ContentType, CryptoError};
use ports::ServiceError;

/// Result type for Cipherflow operations
pub type Result<T> = std::result::Result<T, CipherflowError>;

/// Main error type for Cipherflow.
///
/// Every variant names the job or result it concerns.
#[derive(Debug, thiserror::Error)]
pub enum CipherflowError {
    #[error("Job submission failed: {0}")]
    Submission(#[source] ServiceError),

    #[error("Job {job} did not finish within {timeout:?} ({polls} status reads)")]
    JobTimeout {
        job: String,
        timeout: Duration,
        polls: u32,
    },

    #[error("Job {job} failed: {message}")]
    JobExecution { job: String, message: String },

    #[error("Job {job} succeeded without producing any result")]
    EmptyResultSet { job: String },

    #[error("Could not read status of job {job}: {source}")]
    StatusUnavailable {
        job: String,
        #[source]
        source: ServiceError,
    },

    #[error("Polling of job {job} was cancelled")]
    Cancelled { job: String },

    #[error("Could not resolve result {result} of job {job}: {source}")]
    ResultCollection {
        job: String,
        result: String,
        #[source]
        source: ServiceError,
    },

    #[error("Could not fetch result {result} of job {job}: {source}")]
    ResultFetch {
        job: String,
        result: String,
        #[source]
        source: ServiceError,
    },

    #[error("Key switch failed for result {result} of job {job}: {source}")]
    KeySwitch {
        job: String,
        result: String,
        #[source]
        source: ServiceError,
    },

    #[error("Protocol violation ({context}): {message}")]
    ProtocolViolation { context: String, message: String },

    #[error("Unsupported content type '{content_type}' for result {result} of job {job}")]
    UnsupportedContentType {
        job: String,
        result: String,
        content_type: ContentType,
    },

    #[error("Cryptographic engine failed for result {result} of job {job}: {source}")]
    Crypto {
        job: String,
        result: String,
        #[source]
        source: CryptoError,
    },

    #[error("Malformed payload for result {result} of job {job}: {message}")]
    Decode {
        job: String,
        result: String,
        message: String,
    },

    #[error("Post-processing failed for result {result} of job {job}: {message}")]
    PostProcessing {
        job: String,
        result: String,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}
