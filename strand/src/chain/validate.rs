//! Chain validation: structural checks plus terminal-profile reachability.
//!
//! Structural validation runs before every execution. The profile validator
//! is for callers that need a guarantee about the final value's type before
//! they run anything (e.g. "this chain must end in a chat history").

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::chain::definition::{HandlerKind, TaskChainDefinition, END};
use crate::datatype::DataType;
use crate::error::EngineError;

/// Validation failure for a chain definition.
#[derive(Debug, Error)]
pub enum ChainValidationError {
    #[error("chain has no tasks")]
    Empty,
    #[error("task id must not be empty")]
    EmptyTaskId,
    #[error("task id {0:?} is reserved")]
    ReservedTaskId(String),
    #[error("duplicate task id {0:?}")]
    DuplicateTaskId(String),
    #[error("task {0:?} has no transition branches")]
    NoBranches(String),
    #[error("task {task:?} routes to unknown task {target:?}")]
    UnknownGoto { task: String, target: String },
    #[error("task {task:?} onFailure routes to unknown task {target:?}")]
    UnknownOnFailure { task: String, target: String },
    #[error("task {0:?} uses the hook handler without a hook call")]
    MissingHook(String),
    #[error("task {0:?} uses prompt_to_condition without validConditions")]
    MissingConditions(String),
    #[error("chain cannot reach a terminal task producing {expected}")]
    NoTerminalWithProfile { expected: DataType },
}

impl From<ChainValidationError> for EngineError {
    fn from(e: ChainValidationError) -> Self {
        EngineError::InvalidChain(e.to_string())
    }
}

/// Structural validation: IDs, branch shape, and transition targets.
pub fn validate_chain(chain: &TaskChainDefinition) -> Result<(), ChainValidationError> {
    if chain.tasks.is_empty() {
        return Err(ChainValidationError::Empty);
    }
    let mut seen = HashSet::new();
    for task in &chain.tasks {
        if task.id.is_empty() {
            return Err(ChainValidationError::EmptyTaskId);
        }
        if task.id == END {
            return Err(ChainValidationError::ReservedTaskId(task.id.clone()));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(ChainValidationError::DuplicateTaskId(task.id.clone()));
        }
    }
    for task in &chain.tasks {
        if task.transition.branches.is_empty() {
            return Err(ChainValidationError::NoBranches(task.id.clone()));
        }
        for branch in &task.transition.branches {
            // An empty goto is treated as `end` at runtime.
            if !branch.goto.is_empty() && branch.goto != END && !seen.contains(branch.goto.as_str())
            {
                return Err(ChainValidationError::UnknownGoto {
                    task: task.id.clone(),
                    target: branch.goto.clone(),
                });
            }
        }
        if let Some(target) = &task.transition.on_failure {
            if target != END && !seen.contains(target.as_str()) {
                return Err(ChainValidationError::UnknownOnFailure {
                    task: task.id.clone(),
                    target: target.clone(),
                });
            }
        }
        if task.handler == HandlerKind::Hook && task.hook.is_none() {
            return Err(ChainValidationError::MissingHook(task.id.clone()));
        }
        if task.handler == HandlerKind::PromptToCondition
            && task
                .valid_conditions
                .as_ref()
                .map(|c| c.is_empty())
                .unwrap_or(true)
        {
            return Err(ChainValidationError::MissingConditions(task.id.clone()));
        }
    }
    Ok(())
}

/// Static output type of a handler, before any compose rewrites it.
///
/// `Any` means the type depends on runtime input (noop, hook) and cannot be
/// refuted ahead of execution.
pub fn handler_output_type(handler: HandlerKind) -> DataType {
    match handler {
        HandlerKind::Noop | HandlerKind::Hook => DataType::Any,
        HandlerKind::RaiseError => DataType::Nil,
        HandlerKind::PromptToString | HandlerKind::PromptToCondition => DataType::String,
        HandlerKind::PromptToInt => DataType::Int,
        HandlerKind::PromptToFloat | HandlerKind::PromptToRange => DataType::Float,
        HandlerKind::PromptToBool => DataType::Bool,
        HandlerKind::ChatCompletion | HandlerKind::ExecuteToolCalls => DataType::ChatHistory,
        HandlerKind::ConvertToOpenaiChatResponse => DataType::OpenaiChatResponse,
        HandlerKind::Embedding => DataType::Vector,
    }
}

/// Checks that some path from the entry task reaches a task that both exits
/// to `end` and produces an output satisfying `profile`.
///
/// Runs structural validation first. Failure routing (`onFailure`) edges
/// count as reachable paths; `raise_error` tasks never terminate a chain
/// successfully and are skipped as terminals.
pub fn validate_terminal_profile(
    chain: &TaskChainDefinition,
    profile: DataType,
) -> Result<(), ChainValidationError> {
    validate_chain(chain)?;

    let by_id: HashMap<&str, usize> = chain
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    let mut reachable = HashSet::new();
    let mut stack = vec![chain.tasks[0].id.as_str()];
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        let task = &chain.tasks[by_id[id]];
        for branch in &task.transition.branches {
            if !branch.goto.is_empty() && branch.goto != END {
                stack.push(branch.goto.as_str());
            }
        }
        if let Some(target) = &task.transition.on_failure {
            if target != END {
                stack.push(target.as_str());
            }
        }
    }

    let ok = chain.tasks.iter().any(|t| {
        reachable.contains(t.id.as_str())
            && t.handler != HandlerKind::RaiseError
            && t.transition
                .branches
                .iter()
                .any(|b| b.goto.is_empty() || b.goto == END)
            && handler_output_type(t.handler).satisfies(profile)
    });
    if ok {
        Ok(())
    } else {
        Err(ChainValidationError::NoTerminalWithProfile { expected: profile })
    }
}
