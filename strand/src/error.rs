//! Engine error taxonomy.
//!
//! Every failure the runtime can produce maps onto one of six kinds
//! (validation, rendering, resolution, execution, cancellation, breakpoint).
//! The kind drives retry and failure-routing policy in the interpreter and is
//! copied onto the recorded step so traces can be filtered without string
//! matching.

use chain_trace::{StepError, StepErrorKind};
use thiserror::Error;

/// Engine execution error.
///
/// Returned by the chain interpreter, the task executor, and the leaf
/// components they call. `kind()` classifies the error; only
/// `Execution`-kind errors are retried.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Chain shape is invalid (empty, reserved IDs, dangling goto, …).
    #[error("invalid chain: {0}")]
    InvalidChain(String),

    /// A goto or onFailure target does not name a task in the chain.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// An `inputVar` or compose `withVar` names a variable that was never set.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// Template parse/execute or macro expansion failed.
    #[error("template error: {0}")]
    Template(String),

    /// Marshalling a value to/from JSON failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No provider in the catalogue satisfies the request.
    #[error("no provider matches request: {0}")]
    NoProvider(String),

    /// A provider's backend ID is not a usable http(s) URL.
    #[error("invalid backend url {url}: {reason}")]
    BadBackendUrl { url: String, reason: String },

    /// The selected provider cannot serve the requested capability.
    #[error("provider {provider} does not support {capability}")]
    CapabilityUnsupported { provider: String, capability: String },

    /// A hook call failed (unknown hook, transport, non-2xx, timeout).
    #[error("hook error: {0}")]
    Hook(String),

    /// An LLM call or other external operation failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The ambient context was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// A breakpoint was set on the task (test-only signal).
    #[error("breakpoint hit at task {0}")]
    Breakpoint(String),

    /// A task exhausted its retries; wraps the last underlying error.
    #[error("task {task_id} failed after {attempts} attempts: {source}")]
    TaskFailed {
        task_id: String,
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Classifies the error into the step-record taxonomy.
    pub fn kind(&self) -> StepErrorKind {
        match self {
            EngineError::InvalidChain(_)
            | EngineError::UnknownTask(_)
            | EngineError::UnknownVariable(_) => StepErrorKind::Validation,
            EngineError::Template(_) | EngineError::Serialization(_) => StepErrorKind::Rendering,
            EngineError::NoProvider(_)
            | EngineError::BadBackendUrl { .. }
            | EngineError::CapabilityUnsupported { .. } => StepErrorKind::Resolution,
            EngineError::Hook(_) | EngineError::Execution(_) => StepErrorKind::Execution,
            EngineError::Cancelled => StepErrorKind::Cancelled,
            EngineError::Breakpoint(_) => StepErrorKind::Breakpoint,
            EngineError::TaskFailed { source, .. } => source.kind(),
        }
    }

    /// Whether the interpreter's retry loop applies to this error.
    ///
    /// Only execution-kind failures (LLM calls, hooks, timeouts) are
    /// transient; everything else fails the attempt loop immediately.
    pub fn retryable(&self) -> bool {
        matches!(self.kind(), StepErrorKind::Execution)
    }

    /// Converts into the wire-shape error recorded on a step.
    pub fn to_step_error(&self) -> StepError {
        StepError {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Each variant maps to its taxonomy kind.
    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            EngineError::InvalidChain("x".into()).kind(),
            StepErrorKind::Validation
        );
        assert_eq!(
            EngineError::Template("x".into()).kind(),
            StepErrorKind::Rendering
        );
        assert_eq!(
            EngineError::NoProvider("chat".into()).kind(),
            StepErrorKind::Resolution
        );
        assert_eq!(
            EngineError::Hook("down".into()).kind(),
            StepErrorKind::Execution
        );
        assert_eq!(EngineError::Cancelled.kind(), StepErrorKind::Cancelled);
        assert_eq!(
            EngineError::Breakpoint("t1".into()).kind(),
            StepErrorKind::Breakpoint
        );
    }

    /// **Scenario**: Only execution-kind errors are retryable.
    #[test]
    fn only_execution_kind_retries() {
        assert!(EngineError::Execution("llm 503".into()).retryable());
        assert!(EngineError::Hook("timeout".into()).retryable());
        assert!(!EngineError::InvalidChain("empty".into()).retryable());
        assert!(!EngineError::Cancelled.retryable());
        assert!(!EngineError::Template("bad".into()).retryable());
    }

    /// **Scenario**: TaskFailed inherits the kind of its source error.
    #[test]
    fn task_failed_inherits_source_kind() {
        let err = EngineError::TaskFailed {
            task_id: "t1".into(),
            attempts: 3,
            source: Box::new(EngineError::Execution("boom".into())),
        };
        assert_eq!(err.kind(), StepErrorKind::Execution);
        let s = err.to_string();
        assert!(s.contains("t1"), "{}", s);
        assert!(s.contains("3 attempts"), "{}", s);
    }
}
