//! Inspector: per-execution step recording, breakpoints, and an optional
//! KV-backed tracker.
//!
//! `Inspector::start` hands the interpreter a `StackTrace`; every task
//! attempt is recorded exactly once. When a tracker is configured the step
//! is also pushed onto a per-request list keyed by the context's request ID
//! and trimmed to the last [`TRACKER_LIMIT`] entries.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chain_trace::{CapturedStep, TraceEnvelope};
use dashmap::DashMap;

use crate::context::ExecContext;
use crate::error::EngineError;

/// Maximum steps a tracker keeps per request.
pub const TRACKER_LIMIT: usize = 1000;

/// Sink for persisted steps (KV store, message queue).
#[async_trait]
pub trait StepTracker: Send + Sync {
    /// Appends a step under `request_id`, trimming to the last
    /// [`TRACKER_LIMIT`] entries.
    async fn push(&self, request_id: &str, step: &CapturedStep) -> Result<(), EngineError>;
}

/// In-memory tracker for tests and embedded runs.
#[derive(Default)]
pub struct InMemoryStepTracker {
    lists: DashMap<String, Vec<CapturedStep>>,
}

impl InMemoryStepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps_for(&self, request_id: &str) -> Vec<CapturedStep> {
        self.lists
            .get(request_id)
            .map(|l| l.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StepTracker for InMemoryStepTracker {
    async fn push(&self, request_id: &str, step: &CapturedStep) -> Result<(), EngineError> {
        let mut list = self.lists.entry(request_id.to_string()).or_default();
        list.push(step.clone());
        let excess = list.len().saturating_sub(TRACKER_LIMIT);
        if excess > 0 {
            list.drain(..excess);
        }
        Ok(())
    }
}

/// Per-execution recorder.
pub struct StackTrace {
    request_id: String,
    steps: Mutex<Vec<CapturedStep>>,
    breakpoints: Mutex<HashSet<String>>,
    tracker: Option<Arc<dyn StepTracker>>,
}

impl StackTrace {
    /// Records one step; called once per task attempt.
    pub async fn record_step(&self, step: CapturedStep) {
        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.push(&self.request_id, &step).await {
                tracing::warn!(request_id = %self.request_id, error = %e, "step tracker push failed");
            }
        }
        self.steps.lock().expect("trace lock").push(step);
    }

    /// Steps recorded so far, in order.
    pub fn get_execution_history(&self) -> Vec<CapturedStep> {
        self.steps.lock().expect("trace lock").clone()
    }

    /// Packs the history into a trace envelope for persistence/rendering.
    pub fn envelope(&self, chain_id: &str) -> TraceEnvelope {
        TraceEnvelope::new(
            self.request_id.clone(),
            chain_id,
            self.get_execution_history(),
        )
    }

    pub fn set_breakpoint(&self, task_id: impl Into<String>) {
        self.breakpoints
            .lock()
            .expect("breakpoint lock")
            .insert(task_id.into());
    }

    pub fn clear_breakpoints(&self) {
        self.breakpoints.lock().expect("breakpoint lock").clear();
    }

    pub fn has_breakpoint(&self, task_id: &str) -> bool {
        self.breakpoints
            .lock()
            .expect("breakpoint lock")
            .contains(task_id)
    }
}

/// Creates `StackTrace`s; one per execution.
pub trait Inspector: Send + Sync {
    fn start(&self, ctx: &ExecContext) -> Arc<StackTrace>;
}

/// Default inspector; attach a tracker to persist steps by request ID.
#[derive(Default)]
pub struct StepInspector {
    tracker: Option<Arc<dyn StepTracker>>,
}

impl StepInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn StepTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

impl Inspector for StepInspector {
    fn start(&self, ctx: &ExecContext) -> Arc<StackTrace> {
        Arc::new(StackTrace {
            request_id: ctx.request_id.clone(),
            steps: Mutex::new(Vec::new()),
            breakpoints: Mutex::new(HashSet::new()),
            tracker: self.tracker.clone(),
        })
    }
}
