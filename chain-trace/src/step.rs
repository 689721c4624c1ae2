//! One recorded task-execution attempt: handler, value types, transition, error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a step-level failure.
///
/// Mirrors the engine's error taxonomy so a rendered trace can tell a
/// validation mistake apart from a transient execution failure without
/// parsing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// Chain invalid, unknown task target, bad operand.
    Validation,
    /// Template parse/execute, macro expansion, JSON marshal.
    Rendering,
    /// No matching provider, bad backend URL, unsupported capability.
    Resolution,
    /// LLM call, hook HTTP/SSH, timeout, 5xx.
    Execution,
    /// Ambient context was cancelled.
    Cancelled,
    /// Deterministic pause for test harnesses.
    Breakpoint,
}

/// Error captured on a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

/// A structured record of one task execution attempt.
///
/// Appended once per attempt (including retries). `input`/`output` are only
/// populated when the chain runs in debug mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedStep {
    /// Unique id for this step record.
    pub id: String,
    /// Task that executed.
    pub task_id: String,
    /// Handler name (e.g. "prompt_to_string").
    pub task_handler: String,
    /// Data type tag of the task input (e.g. "string", "chat_history").
    pub input_type: String,
    /// Data type tag of the task output; "nil" on failure.
    pub output_type: String,
    /// Transition taken after the step: the chosen goto target, or
    /// "on_failure:<target>" when failure routing fired. Empty while retrying.
    #[serde(default)]
    pub transition: String,
    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: u64,
    /// Error on a failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Variable the task read its input from, when `inputVar` was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_var: Option<String>,
    /// Raw input value (debug mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Raw output value (debug mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
}

impl CapturedStep {
    /// Serializes this step to a JSON object.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
