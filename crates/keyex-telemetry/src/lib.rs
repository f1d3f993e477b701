//! This crate contains the tracing primitives used by the key-exchange
//! service to emit console and file logs.
pub mod tracing;

pub use tracing::{TelemetryOptions, Tracing};
