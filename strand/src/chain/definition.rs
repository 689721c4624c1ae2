//! Declarative chain model: tasks, transitions, branches, compose directives.
//!
//! Deserialized from the caller's chain JSON (camelCase keys, unknown fields
//! ignored). The definition is read-only during execution; the macro pass
//! works on a deep clone.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Reserved transition target that terminates the chain.
pub const END: &str = "end";

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Noop,
    RaiseError,
    PromptToString,
    PromptToInt,
    PromptToFloat,
    PromptToBool,
    PromptToCondition,
    PromptToRange,
    ChatCompletion,
    ExecuteToolCalls,
    Hook,
    ConvertToOpenaiChatResponse,
    Embedding,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Noop => "noop",
            HandlerKind::RaiseError => "raise_error",
            HandlerKind::PromptToString => "prompt_to_string",
            HandlerKind::PromptToInt => "prompt_to_int",
            HandlerKind::PromptToFloat => "prompt_to_float",
            HandlerKind::PromptToBool => "prompt_to_bool",
            HandlerKind::PromptToCondition => "prompt_to_condition",
            HandlerKind::PromptToRange => "prompt_to_range",
            HandlerKind::ChatCompletion => "chat_completion",
            HandlerKind::ExecuteToolCalls => "execute_tool_calls",
            HandlerKind::Hook => "hook",
            HandlerKind::ConvertToOpenaiChatResponse => "convert_to_openai_chat_response",
            HandlerKind::Embedding => "embedding",
        }
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison applied to a handler's transition eval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    #[serde(alias = "gt")]
    GreaterThan,
    #[serde(alias = "lt")]
    LessThan,
    #[serde(alias = "range")]
    Between,
    Default,
}

/// How a branch merges the current output with a stored variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposeStrategy {
    Override,
    AppendStringToChatHistory,
    MergeChatHistories,
}

/// Compose directive on a transition branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchCompose {
    /// Variable merged with the current output.
    pub with_var: String,
    /// Strategy; omitted means auto-select by operand types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ComposeStrategy>,
}

/// One branch of a task transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionBranch {
    pub operator: TransitionOperator,
    #[serde(default)]
    pub when: String,
    /// Next task ID, or the sentinel `end`.
    #[serde(default)]
    pub goto: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<BranchCompose>,
}

/// A task's outgoing transition: ordered branches plus failure routing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTransition {
    #[serde(default)]
    pub branches: Vec<TransitionBranch>,
    /// Where to jump when the task exhausts its retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}

/// A single hook invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookCall {
    /// Registered hook name.
    pub name: String,
    /// Tool within the hook; may carry a `"{hook}."` prefix which the
    /// registry strips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub args: HashMap<String, String>,
}

/// Tool-calling configuration: which hooks this task's LLM may call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteConfig {
    #[serde(default)]
    pub hooks: Vec<String>,
}

/// One node of the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Unique within the chain; must not be empty or `end`.
    pub id: String,
    pub handler: HandlerKind,
    /// Read input from this variable instead of the previous output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_var: Option<String>,
    /// Rendered against the variable map; the result becomes the task input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Side-effect template emitted on the print sink after the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print: Option<String>,
    /// Re-renders the task's string output after execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_template: Option<String>,
    /// Additional attempts after the first failure.
    #[serde(default)]
    pub retry_on_failure: u32,
    /// Per-attempt timeout as a duration literal (`"30s"`, `"500ms"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Allowed keys for the `prompt_to_condition` handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_conditions: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_config: Option<ExecuteConfig>,
    /// Hook call for the `hook` handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookCall>,
    pub transition: TaskTransition,
}

impl TaskDefinition {
    /// Parses the `timeout` duration literal, if set.
    pub fn timeout_duration(&self) -> Result<Option<Duration>, EngineError> {
        self.timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
    }
}

/// The chain: an ordered task list whose first entry is the start node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChainDefinition {
    pub id: String,
    pub tasks: Vec<TaskDefinition>,
    /// Token budget enforced by LLM handlers across the whole execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<u64>,
    /// Capture raw inputs/outputs on every recorded step.
    #[serde(default)]
    pub debug: bool,
}

impl TaskChainDefinition {
    /// Looks up a task by ID.
    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// Parses duration literals of the form `"250ms"`, `"30s"`, `"5m"`, `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, EngineError> {
    let t = s.trim();
    let split = t
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| EngineError::InvalidChain(format!("duration {s:?} has no unit")))?;
    let (num, unit) = t.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| EngineError::InvalidChain(format!("bad duration value in {s:?}")))?;
    let secs = match unit.trim() {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => {
            return Err(EngineError::InvalidChain(format!(
                "unknown duration unit {other:?} in {s:?}"
            )))
        }
    };
    if !secs.is_finite() || secs < 0.0 {
        return Err(EngineError::InvalidChain(format!("bad duration {s:?}")));
    }
    Ok(Duration::from_secs_f64(secs))
}
