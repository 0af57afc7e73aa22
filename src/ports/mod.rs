//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the pipeline and external systems (computation service,
//! cryptographic engine, time).

mod clock;
mod computation_service;
mod crypto_engine;

pub use clock::Clock;
pub use computation_service::{ComputationService, ServiceError};
pub use crypto_engine::{CorrectedStatistic, CryptoEngine, CryptoEngineHandle, VariableBounds};
