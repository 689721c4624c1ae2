//! Per-request trace envelope: request/chain identity plus the recorded steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::step::CapturedStep;

/// A full execution trace for one request.
///
/// Built by the engine's inspector when a run finishes (or fails) and handed
/// to whatever surface renders the post-mortem. `request_id` is the key a
/// KV-backed tracker stores the step list under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEnvelope {
    /// Request ID the trace is keyed by.
    pub request_id: String,
    /// ID of the chain that ran.
    pub chain_id: String,
    /// Steps in recording order, one per execution attempt.
    pub steps: Vec<CapturedStep>,
    /// When the envelope was assembled.
    pub captured_at: DateTime<Utc>,
}

impl TraceEnvelope {
    pub fn new(
        request_id: impl Into<String>,
        chain_id: impl Into<String>,
        steps: Vec<CapturedStep>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            chain_id: chain_id.into(),
            steps,
            captured_at: Utc::now(),
        }
    }

    /// Serializes the envelope to a JSON object.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Task IDs of failed steps, in order. Convenience for post-mortems.
    pub fn failed_task_ids(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.task_id.as_str())
            .collect()
    }
}
