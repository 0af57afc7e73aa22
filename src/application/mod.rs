//! Application layer: the job-execution and result-release pipeline.
//!
//! Components in pipeline order:
//! - `StatusPoller`: submitted job to terminal state
//! - `ResultCollector`: terminal job to artifact descriptors
//! - `KeySwitchNegotiator`: descriptor to released payload (ephemeral key)
//! - `DecryptionDispatcher`: released payload to decrypted artifact
//! - `PostProcessor`: DP correction and confidence intervals
//!
//! `ComputationRunner` chains them.

mod collector;
mod dispatcher;
mod negotiator;
mod poller;
mod post_processor;
mod runner;

pub use collector::ResultCollector;
pub use dispatcher::{decode_plaintext, DecodeRoutine, DecryptionDispatcher};
pub use negotiator::{EphemeralKeyPair, KeySwitchNegotiator, Released};
pub use poller::{CancellationFlag, StatusPoller};
pub use post_processor::{PostProcessing, PostProcessor};
pub use runner::{ComputationRunner, ComputationRunnerBuilder, JobOutcome, ResultOutcome};
