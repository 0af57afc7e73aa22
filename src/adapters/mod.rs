//! Adapters layer: Concrete implementations of ports.
//!
//! - `http`: REST client for the remote computation service
//! - `memory`: scripted in-memory computation service
//! - `clock`: system clock
//! - `sanitize`: secret filtering for logs

pub mod clock;
pub mod http;
pub mod memory;
pub mod sanitize;

pub use clock::SystemClock;
pub use http::HttpComputationService;
pub use memory::InMemoryComputationService;
