//! Captured-step and trace wire types for chain executions.
//!
//! This crate defines the shape of a single recorded execution step and the
//! per-request trace envelope. It does not depend on the engine; the engine
//! records `CapturedStep`s through its inspector and servers/CLIs render them.

pub mod envelope;
pub mod step;

pub use envelope::TraceEnvelope;
pub use step::{CapturedStep, StepError, StepErrorKind};
