//! Domain layer: Core types of the job-execution and result-release pipeline.
//!
//! Pure data types with serde support and no I/O.

mod artifact;
mod crypto;
mod job;

pub use artifact::{
    ArtifactDescriptor, ConfidenceInterval, ContentType, DecryptedArtifact, NoiseMetadata,
    NumericTable, ReleasedArtifact, ResultMetadata, StatisticRecord, StatisticsSummary,
    StringTable,
};
pub use crypto::{CryptoContext, CryptoError, PublicKey};
pub use job::{
    ComputationDefinition, JobDefinition, JobHandle, JobStatus, Quantity, ResultReference,
    StatisticDefinition, StatusReport, TerminalJob,
};
