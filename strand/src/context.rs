//! Execution context passed into every chain run.
//!
//! Carries the request-scoped values the engine routes on: request/trace/span
//! IDs, template variables for `{{var:…}}` macros, the cancellation token,
//! and an optional absolute deadline. The engine never reads process
//! environment variables; everything it needs travels on this struct.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::EngineError;

/// Request-scoped execution context.
///
/// Cheap to clone; the cancellation token is shared across clones so
/// cancelling one handle cancels the whole execution.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Request ID; keys the persisted trace.
    pub request_id: String,
    /// Distributed-tracing trace ID, when the caller propagates one.
    pub trace_id: Option<String>,
    /// Distributed-tracing span ID.
    pub span_id: Option<String>,
    /// Variables for `{{var:…}}` macro expansion.
    pub template_vars: HashMap<String, String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecContext {
    /// Creates a context with a fresh request ID and no deadline.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            trace_id: None,
            span_id: None,
            template_vars: HashMap::new(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    pub fn with_template_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.template_vars = vars;
        self
    }

    pub fn with_template_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.template_vars.insert(name.into(), value.into());
        self
    }

    /// Attaches an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sets an absolute deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// The shared cancellation token, for passing into spawned I/O.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels the execution this context belongs to.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Errors with `Cancelled` when the token has fired or the deadline passed.
    ///
    /// The interpreter calls this before every task; handlers call it before
    /// external I/O.
    pub fn ensure_live(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::Cancelled);
            }
        }
        Ok(())
    }

    /// Time left until the ambient deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The effective timeout for one I/O: the smaller of `requested` and the
    /// ambient remainder. A per-call timeout narrows the deadline, never
    /// extends it.
    pub fn io_timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        match (requested, self.remaining()) {
            (Some(r), Some(a)) => Some(r.min(a)),
            (Some(r), None) => Some(r),
            (None, ambient) => ambient,
        }
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}
